use std::sync::Arc;

use common::database::DatabaseError;
use common::errors::ErrorKind;
use common::schema::{DatasetMapping, SchemaError};
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use tokio::select;
use tokio_util::sync::CancellationToken;

use crate::global::GlobalState;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("schema: {0}")]
    Schema(#[from] SchemaError),
    #[error("database: {0}")]
    Database(#[from] DatabaseError),
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Schema(_) => ErrorKind::Malformed,
            Self::Database(_) => ErrorKind::Transient,
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
            tracing::info!(%correlation_id, "cancelled mid-mapping, leaving delivery unacked");
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
    let value = global.mapping_schema.validate(&delivery.data)?;
    let message: DatasetMapping = serde_json::from_value(value).map_err(SchemaError::Json)?;

    tracing::debug!(
        %correlation_id,
        dataset_id = %message.dataset_id,
        accessions = message.accession_ids.len(),
        "mapping dataset"
    );

    global
        .db
        .map_dataset(&message.dataset_id, &message.accession_ids)
        .await?;

    Ok(())
}
