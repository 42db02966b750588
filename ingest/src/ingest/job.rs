use std::sync::Arc;

use common::c4gh::{read_header, C4ghError};
use common::database::DatabaseError;
use common::errors::ErrorKind;
use common::schema::{Checksum, IngestionTrigger, IngestionVerification, SchemaError};
use common::storage::{FileWriter, StorageError};
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::select;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::global::GlobalState;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("schema: {0}")]
    Schema(#[from] SchemaError),
    #[error("database: {0}")]
    Database(DatabaseError),
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
    #[error("not a crypt4gh upload: {0}")]
    BadHeader(C4ghError),
    #[error("file {0} was already archived")]
    AlreadyArchived(i64),
    #[error("broker: {0}")]
    Broker(#[from] common::rmq::BrokerError),
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Schema(_) => ErrorKind::Malformed,
            Self::BadHeader(_) => ErrorKind::Policy,
            Self::AlreadyArchived(_) => ErrorKind::Conflict,
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
            tracing::info!(%correlation_id, "cancelled mid-ingest, leaving delivery unacked");
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
    let value = global.trigger_schema.validate(&delivery.data)?;
    let message: IngestionTrigger = serde_json::from_value(value).map_err(SchemaError::Json)?;

    tracing::debug!(
        %correlation_id,
        user = %message.user,
        filepath = %message.filepath,
        "ingesting upload"
    );

    let file_id = global
        .db
        .register_file(&message.filepath, &message.user)
        .await
        .map_err(JobError::Database)?;

    let mut reader = global.inbox.file_reader(&message.filepath).await?;

    // The header is peeled off and kept in the database; only the data
    // segments go to the archive.
    let header = match read_header(&mut reader).await {
        Ok(header) => header,
        Err(C4ghError::Io(err)) => return Err(JobError::Storage(StorageError::Io(err))),
        Err(err) => {
            if let Err(e) = global.db.set_error(file_id).await {
                tracing::error!(
                    %correlation_id,
                    "failed to set error status for file {}: {}",
                    file_id,
                    e
                );
            }
            return Err(JobError::BadHeader(err));
        }
    };

    let archive_path = Uuid::new_v4().to_string();
    let mut writer = global.archive.file_writer(&archive_path).await?;

    let copied = stash_object(reader, &mut writer).await;

    let (size, checksum) = match copied {
        Ok(copied) => copied,
        Err(err) => {
            writer.abort().await;
            return Err(err.into());
        }
    };
    writer.finish().await?;

    global
        .db
        .set_archived(file_id, &archive_path, size, &checksum, "sha256", &header)
        .await
        .map_err(|err| match err {
            DatabaseError::StatusConflict(id) => JobError::AlreadyArchived(id),
            err => JobError::Database(err),
        })?;

    let verification = IngestionVerification {
        user: message.user,
        filepath: message.filepath,
        file_id,
        archive_path,
        encrypted_checksums: vec![Checksum::sha256(checksum)],
        re_verify: None,
    };

    let body = serde_json::to_value(&verification).map_err(SchemaError::Json)?;
    global.verification_schema.check(&body)?;
    let body = serde_json::to_vec(&body).map_err(SchemaError::Json)?;

    // The row is ARCHIVED; losing the message would strand the file, so
    // retry and fall back to the error queue.
    if let Err(err) = global
        .rmq
        .publish_with_retry(
            correlation_id,
            &global.config.broker.exchange,
            &global.config.broker.routing_key,
            global.config.broker.durable,
            &body,
        )
        .await
    {
        tracing::error!(
            %correlation_id,
            "failed to publish verification message, dead-lettering it: {}",
            err
        );

        global
            .rmq
            .publish(
                correlation_id,
                &global.config.broker.exchange,
                &global.config.broker.routing_error,
                global.config.broker.durable,
                &body,
            )
            .await?;
    }

    Ok(())
}

/// Streams the remainder of an upload into the archive writer, hashing the
/// bytes exactly as they are stored.
pub(crate) async fn stash_object(
    mut reader: Box<dyn AsyncRead + Send + Unpin>,
    writer: &mut FileWriter,
) -> Result<(i64, String), StorageError> {
    let mut hasher = Sha256::new();
    let mut size: i64 = 0;
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }

        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n]).await?;
        size += n as i64;
    }

    Ok((size, hex::encode(hasher.finalize())))
}
