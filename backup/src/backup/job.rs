use std::sync::Arc;

use common::database::DatabaseError;
use common::errors::ErrorKind;
use common::schema::{IngestionCompletion, SchemaError};
use common::storage::{Backend, StorageError};
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio::select;
use tokio_util::sync::CancellationToken;

use crate::global::GlobalState;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("schema: {0}")]
    Schema(#[from] SchemaError),
    #[error("no archived file matches the completion message")]
    UnknownFile,
    #[error("database: {0}")]
    Database(DatabaseError),
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
    #[error("backup copy of file {0} does not match the archive checksum")]
    ChecksumMismatch(i64),
    #[error("broker: {0}")]
    Broker(#[from] common::rmq::BrokerError),
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Schema(_) => ErrorKind::Malformed,
            Self::UnknownFile | Self::ChecksumMismatch(_) => ErrorKind::Policy,
            Self::Database(_) | Self::Storage(_) | Self::Broker(_) => ErrorKind::Transient,
        }
    }
}

pub async fn handle_delivery(
    global: Arc<GlobalState>,
    delivery: Delivery,
    shutdown_token: CancellationToken,
) {
    let correlation_id = delivery
        .properties
        .correlation_id()
        .as_ref()
        .map(|s| s.to_string())
        .unwrap_or_default();

    let result = select! {
        r = process_delivery(&global, &delivery, &correlation_id) => r,
        _ = shutdown_token.cancelled() => {
            tracing::info!(%correlation_id, "cancelled mid-backup, leaving delivery unacked");
            return;
        }
    };

    match result {
        Ok(()) => {
            if let Err(err) = delivery.acker.ack(BasicAckOptions::default()).await {
                tracing::error!(%correlation_id, "failed to ack delivery: {}", err);
            }
        }
        Err(err) => match err.kind() {
            ErrorKind::Malformed | ErrorKind::Policy => {
                tracing::error!(%correlation_id, "rejecting delivery: {}", err);

                if let Err(e) = global
                    .rmq
                    .publish(
                        &correlation_id,
                        &global.config.broker.exchange,
                        &global.config.broker.routing_error,
                        global.config.broker.durable,
                        &delivery.data,
                    )
                    .await
                {
                    tracing::error!(%correlation_id, "failed to dead-letter delivery: {}", e);
                }

                if let Err(e) = delivery
                    .acker
                    .nack(BasicNackOptions {
                        requeue: false,
                        ..Default::default()
                    })
                    .await
                {
                    tracing::error!(%correlation_id, "failed to nack delivery: {}", e);
                }
            }
            ErrorKind::Transient => {
                tracing::warn!(
                    %correlation_id,
                    "transient failure, waiting for redelivery: {}",
                    err
                );
            }
            ErrorKind::Conflict => {
                tracing::info!(%correlation_id, "{}", err);

                if let Err(e) = delivery.acker.ack(BasicAckOptions::default()).await {
                    tracing::error!(%correlation_id, "failed to ack delivery: {}", e);
                }
            }
        },
    }
}

async fn process_delivery(
    global: &Arc<GlobalState>,
    delivery: &Delivery,
    correlation_id: &str,
) -> Result<(), JobError> {
    let value = global.completion_schema.validate(&delivery.data)?;
    let message: IngestionCompletion = serde_json::from_value(value).map_err(SchemaError::Json)?;

    let archived = global
        .db
        .get_archived(&message.user, &message.filepath)
        .await
        .map_err(|err| match err {
            DatabaseError::NotFound => JobError::UnknownFile,
            err => JobError::Database(err),
        })?;

    tracing::debug!(
        %correlation_id,
        file_id = archived.id,
        archive_path = %archived.archive_path,
        "copying archive object to backup"
    );

    copy_object(&global.archive, &global.backup, &archived.archive_path).await?;

    // Trust nothing about the copy: read the backup object back and compare
    // against the checksum the archive row attests to.
    let (size, checksum) = hash_object(&global.backup, &archived.archive_path).await?;

    if size != archived.size || !checksum.eq_ignore_ascii_case(&archived.checksum) {
        if let Err(err) = global.db.set_error(archived.id).await {
            tracing::error!(
                %correlation_id,
                "failed to set error status for file {}: {}",
                archived.id,
                err
            );
        }
        return Err(JobError::ChecksumMismatch(archived.id));
    }

    global
        .db
        .mark_backed_up(archived.id)
        .await
        .map_err(JobError::Database)?;

    // Forward the completion notice so downstream consumers know the
    // redundant copy exists.
    global
        .rmq
        .publish_with_retry(
            correlation_id,
            &global.config.broker.exchange,
            &global.config.broker.routing_key,
            global.config.broker.durable,
            &delivery.data,
        )
        .await?;

    Ok(())
}

/// Streams one object between backends without buffering it.
pub(crate) async fn copy_object(
    source: &Backend,
    target: &Backend,
    path: &str,
) -> Result<(), StorageError> {
    let mut reader = source.file_reader(path).await?;
    let mut writer = target.file_writer(path).await?;

    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                writer.abort().await;
                return Err(err.into());
            }
        };

        if let Err(err) = writer.write_all(&buf[..n]).await {
            writer.abort().await;
            return Err(err);
        }
    }

    writer.finish().await
}

/// Reads an object back and digests it.
pub(crate) async fn hash_object(
    backend: &Backend,
    path: &str,
) -> Result<(i64, String), StorageError> {
    let mut reader = backend.file_reader(path).await?;

    let mut hasher = Sha256::new();
    let mut size: i64 = 0;
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }

        hasher.update(&buf[..n]);
        size += n as i64;
    }

    Ok((size, hex::encode(hasher.finalize())))
}
