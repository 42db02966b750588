use std::io::Read as _;
use std::sync::Arc;

use common::c4gh::{DigestSink, HashingReader, PlaintextDigests};
use common::database::{DatabaseError, FileInfo};
use common::errors::ErrorKind;
use common::schema::{
    find_checksum, AccessionRequest, Checksum, ChecksumAlgorithm, IngestionVerification,
    SchemaError,
};
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use tokio::io::AsyncRead;
use tokio::select;
use tokio_util::io::SyncIoBridge;
use tokio_util::sync::CancellationToken;

use crate::global::GlobalState;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("schema: {0}")]
    Schema(#[from] SchemaError),
    #[error("no header stored for file {0}")]
    MissingHeader(i64),
    #[error("database: {0}")]
    Database(DatabaseError),
    #[error("storage: {0}")]
    Storage(#[from] common::storage::StorageError),
    #[error("decryption failed: {0}")]
    Decryption(String),
    #[error("archive checksum mismatch for file {0}")]
    ChecksumMismatch(i64),
    #[error("file {0} was already completed by another worker")]
    AlreadyCompleted(i64),
    #[error("broker: {0}")]
    Broker(#[from] common::rmq::BrokerError),
    #[error("stream pass panicked")]
    Panicked,
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Schema(_) => ErrorKind::Malformed,
            Self::MissingHeader(_) | Self::Decryption(_) | Self::ChecksumMismatch(_) => {
                ErrorKind::Policy
            }
            Self::AlreadyCompleted(_) => ErrorKind::Conflict,
            Self::Database(_) | Self::Storage(_) | Self::Broker(_) | Self::Panicked => {
                ErrorKind::Transient
            }
        }
    }
}

/// Settles one delivery according to the error discipline: ack on success
/// or conflict, dead-letter + reject on permanent failures, and leave the
/// delivery alone on transient ones so the broker redelivers it.
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
            // Nothing has been committed for this delivery; let the broker
            // hand it to another worker.
            tracing::info!(%correlation_id, "cancelled mid-verify, leaving delivery unacked");
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
    let value = global.verification_schema.validate(&delivery.data)?;
    let message: IngestionVerification =
        serde_json::from_value(value).map_err(SchemaError::Json)?;

    tracing::debug!(
        %correlation_id,
        file_id = message.file_id,
        archive_path = %message.archive_path,
        "verifying archived file"
    );

    let header = global
        .db
        .get_header(message.file_id)
        .await
        .map_err(|err| match err {
            DatabaseError::NotFound => JobError::MissingHeader(message.file_id),
            err => JobError::Database(err),
        })?;

    let size = global.archive.get_file_size(&message.archive_path).await?;
    let reader = global.archive.file_reader(&message.archive_path).await?;

    let outcome = stream_verify(header, reader, global.keys.clone()).await?;

    // The encrypted digest must reproduce what ingest recorded; anything
    // else means the archive copy rotted between the two reads.
    if let Some(expected) = find_checksum(&message.encrypted_checksums, ChecksumAlgorithm::Sha256)
    {
        if !outcome.archive_checksum.eq_ignore_ascii_case(expected) {
            if let Err(err) = global.db.set_error(message.file_id).await {
                tracing::error!(
                    %correlation_id,
                    "failed to set error status for file {}: {}",
                    message.file_id,
                    err
                );
            }
            return Err(JobError::ChecksumMismatch(message.file_id));
        }
    }

    if message.re_verify.unwrap_or(false) {
        tracing::info!(
            %correlation_id,
            file_id = message.file_id,
            "re-verification passed, file state untouched"
        );
        return Ok(());
    }

    let info = FileInfo {
        size,
        checksum: outcome.archive_checksum,
        decrypted_size: outcome.digests.size,
        decrypted_checksum: outcome.digests.sha256.clone(),
    };

    global
        .db
        .mark_completed(&info, message.file_id)
        .await
        .map_err(|err| match err {
            DatabaseError::StatusConflict(id) => JobError::AlreadyCompleted(id),
            err => JobError::Database(err),
        })?;

    let request = AccessionRequest {
        user: message.user,
        filepath: message.filepath,
        decrypted_checksums: vec![
            Checksum::sha256(outcome.digests.sha256),
            Checksum::md5(outcome.digests.md5),
        ],
    };

    let body = serde_json::to_value(&request).map_err(SchemaError::Json)?;
    global.accession_request_schema.check(&body)?;
    let body = serde_json::to_vec(&body).map_err(SchemaError::Json)?;

    // The row is COMPLETED at this point. Losing the message here would
    // strand the file, so retry, and failing that dead-letter the request
    // itself for the operator.
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
            "failed to publish accession request, dead-lettering it: {}",
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

pub(crate) struct StreamOutcome {
    /// Hex SHA-256 over the archived bytes exactly as they were read
    pub archive_checksum: String,
    /// Digests of the decrypted stream
    pub digests: PlaintextDigests,
}

/// One streaming pass over the archive object: the stored header is glued
/// in front of the body, the body bytes are teed into a SHA-256 as the
/// decryptor consumes them, and the plaintext is hashed and discarded.
/// Memory stays bounded no matter the object size.
pub(crate) async fn stream_verify(
    header: Vec<u8>,
    reader: Box<dyn AsyncRead + Send + Unpin>,
    keys: Arc<Vec<crypt4gh::Keys>>,
) -> Result<StreamOutcome, JobError> {
    let bridge = SyncIoBridge::new(reader);

    tokio::task::spawn_blocking(move || {
        let mut archive_hash = HashingReader::new(bridge);
        let mut stream = std::io::Cursor::new(header).chain(&mut archive_hash);
        let mut sink = DigestSink::new();

        crypt4gh::decrypt(keys.as_slice(), &mut stream, &mut sink, 0, None, &None)
            .map_err(|e| JobError::Decryption(e.to_string()))?;
        drop(stream);

        Ok(StreamOutcome {
            archive_checksum: archive_hash.into_hex(),
            digests: sink.finish(),
        })
    })
    .await
    .map_err(|_| JobError::Panicked)?
}
