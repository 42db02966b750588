use std::sync::Arc;

use common::database::DatabaseError;
use common::errors::ErrorKind;
use common::schema::{
    find_checksum, ChecksumAlgorithm, IngestionAccession, IngestionCompletion, SchemaError,
};
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use tokio::select;
use tokio_util::sync::CancellationToken;

use crate::global::GlobalState;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("schema: {0}")]
    Schema(#[from] SchemaError),
    #[error("accession message carries no sha256 digest")]
    MissingChecksum,
    #[error("no completed file matches the accession message")]
    UnknownFile,
    #[error("database: {0}")]
    Database(DatabaseError),
    #[error("accession id conflict for file {0}")]
    AccessionConflict(i64),
    #[error("broker: {0}")]
    Broker(#[from] common::rmq::BrokerError),
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Schema(_) | Self::MissingChecksum => ErrorKind::Malformed,
            Self::UnknownFile | Self::AccessionConflict(_) => ErrorKind::Policy,
            Self::Database(_) | Self::Broker(_) => ErrorKind::Transient,
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
            tracing::info!(%correlation_id, "cancelled mid-finalize, leaving delivery unacked");
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
    let value = global.accession_schema.validate(&delivery.data)?;
    let message: IngestionAccession = serde_json::from_value(value).map_err(SchemaError::Json)?;

    tracing::debug!(
        %correlation_id,
        accession_id = %message.accession_id,
        filepath = %message.filepath,
        "assigning accession id"
    );

    let decrypted_checksum =
        find_checksum(&message.decrypted_checksums, ChecksumAlgorithm::Sha256)
            .ok_or(JobError::MissingChecksum)?;

    let file_id = global
        .db
        .get_completed(&message.user, &message.filepath, decrypted_checksum)
        .await
        .map_err(|err| match err {
            DatabaseError::NotFound => JobError::UnknownFile,
            err => JobError::Database(err),
        })?;

    global
        .db
        .set_accession_id(file_id, &message.accession_id)
        .await
        .map_err(|err| match err {
            DatabaseError::AccessionConflict(id) => JobError::AccessionConflict(id),
            err => JobError::Database(err),
        })?;

    let completion = IngestionCompletion {
        user: message.user,
        filepath: message.filepath,
        accession_id: message.accession_id,
        decrypted_checksums: message.decrypted_checksums,
    };

    let body = serde_json::to_value(&completion).map_err(SchemaError::Json)?;
    global.completion_schema.check(&body)?;
    let body = serde_json::to_vec(&body).map_err(SchemaError::Json)?;

    // The row is READY; retry the publish and fall back to the error queue
    // rather than losing the completion notice.
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
            "failed to publish completion, dead-lettering it: {}",
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
