use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{Connection as _, PgPool};

use crate::config::DatabaseConfig;

const RECONNECT_ATTEMPTS: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("sql: {0}")]
    Sql(#[from] sqlx::Error),
    #[error("no matching file row")]
    NotFound,
    #[error("status conflict for file {0}")]
    StatusConflict(i64),
    #[error("accession id conflict for file {0}")]
    AccessionConflict(i64),
}

/// Lifecycle of a file row. Transitions are monotonic; `Error` is a sink
/// that only an operator leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Registered,
    Uploaded,
    Submitted,
    Archived,
    Completed,
    Ready,
    Error,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registered => "REGISTERED",
            Self::Uploaded => "UPLOADED",
            Self::Submitted => "SUBMITTED",
            Self::Archived => "ARCHIVED",
            Self::Completed => "COMPLETED",
            Self::Ready => "READY",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for FileStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        match value.as_str() {
            "REGISTERED" => Ok(Self::Registered),
            "UPLOADED" => Ok(Self::Uploaded),
            "SUBMITTED" => Ok(Self::Submitted),
            "ARCHIVED" => Ok(Self::Archived),
            "COMPLETED" => Ok(Self::Completed),
            "READY" => Ok(Self::Ready),
            "ERROR" => Ok(Self::Error),
            _ => Err(format!("unknown file status: {value}")),
        }
    }
}

/// What the verify pass learned about a file: the re-computed checksum of
/// the stored (encrypted) object and the digests of the decrypted stream.
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Size of the archived object in bytes
    pub size: i64,
    /// Hex SHA-256 over the archived (encrypted) bytes
    pub checksum: String,
    /// Size of the decrypted stream in bytes
    pub decrypted_size: i64,
    /// Hex SHA-256 over the decrypted stream
    pub decrypted_checksum: String,
}

/// The archive location of a file, as recorded at ingest.
#[derive(Debug, Clone)]
pub struct ArchivedFile {
    pub id: i64,
    pub archive_path: String,
    pub checksum: String,
    pub size: i64,
}

/// Connection-pooled handle to the `local_ega` schema. Every operation is a
/// single short transaction; racing workers are serialized by the guarded
/// `UPDATE` statements, which report a status conflict instead of clobbering
/// each other.
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database)
            .ssl_mode(config.sslmode.parse::<PgSslMode>()?);

        if let Some(ca) = &config.ca_cert {
            options = options.ssl_root_cert(ca);
        }
        if let Some(cert) = &config.client_cert {
            options = options.ssl_client_cert(cert);
        }
        if let Some(key) = &config.client_key {
            options = options.ssl_client_key(key);
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Registers a file for ingestion. Idempotent over (user, inbox path)
    /// while the file has not reached ARCHIVED; a re-notification for an
    /// in-flight upload returns the existing row.
    pub async fn register_file(
        &self,
        inbox_path: &str,
        user: &str,
    ) -> Result<i64, DatabaseError> {
        let id = sqlx::query_scalar(
            "INSERT INTO local_ega.files (submission_user, inbox_path, status)
             VALUES ($1, $2, 'REGISTERED')
             ON CONFLICT (submission_user, inbox_path)
                 WHERE status IN ('REGISTERED', 'UPLOADED', 'SUBMITTED')
                 DO UPDATE SET submission_user = EXCLUDED.submission_user
             RETURNING id",
        )
        .bind(user)
        .bind(inbox_path)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Stores the header blob, archive location and encrypted checksum in
    /// one statement and advances the row to ARCHIVED.
    pub async fn set_archived(
        &self,
        file_id: i64,
        archive_path: &str,
        size: i64,
        checksum: &str,
        checksum_type: &str,
        header: &[u8],
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE local_ega.files
             SET status = 'ARCHIVED', archive_path = $2, archive_file_size = $3,
                 archive_file_checksum = $4, archive_file_checksum_type = $5, header = $6
             WHERE id = $1 AND status IN ('REGISTERED', 'UPLOADED', 'SUBMITTED')",
        )
        .bind(file_id)
        .bind(archive_path)
        .bind(size)
        .bind(checksum)
        .bind(checksum_type)
        .bind(header)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::StatusConflict(file_id));
        }

        Ok(())
    }

    pub async fn get_header(&self, file_id: i64) -> Result<Vec<u8>, DatabaseError> {
        let header: Option<Option<Vec<u8>>> =
            sqlx::query_scalar("SELECT header FROM local_ega.files WHERE id = $1")
                .bind(file_id)
                .fetch_optional(&self.pool)
                .await?;

        header.flatten().ok_or(DatabaseError::NotFound)
    }

    /// Records the decrypted digests and advances the row to COMPLETED.
    /// Whichever of two racing verify workers gets here second sees zero
    /// rows updated and a status conflict.
    pub async fn mark_completed(
        &self,
        info: &FileInfo,
        file_id: i64,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE local_ega.files
             SET status = 'COMPLETED', decrypted_file_size = $2,
                 decrypted_file_checksum = $3, decrypted_file_checksum_type = 'sha256'
             WHERE id = $1 AND status = 'ARCHIVED'",
        )
        .bind(file_id)
        .bind(info.decrypted_size)
        .bind(&info.decrypted_checksum)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::StatusConflict(file_id));
        }

        Ok(())
    }

    /// Looks up the COMPLETED file a stable id should be attached to.
    pub async fn get_completed(
        &self,
        user: &str,
        inbox_path: &str,
        decrypted_checksum: &str,
    ) -> Result<i64, DatabaseError> {
        let id: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM local_ega.files
             WHERE submission_user = $1 AND inbox_path = $2
               AND decrypted_file_checksum = $3 AND status IN ('COMPLETED', 'READY')
             ORDER BY id DESC LIMIT 1",
        )
        .bind(user)
        .bind(inbox_path)
        .bind(decrypted_checksum)
        .fetch_optional(&self.pool)
        .await?;

        id.ok_or(DatabaseError::NotFound)
    }

    /// Attaches the stable accession id and advances the row to READY.
    /// Idempotent for the same (file, accession) pair; anything else is a
    /// conflict, including another file already holding the accession id.
    pub async fn set_accession_id(
        &self,
        file_id: i64,
        accession_id: &str,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE local_ega.files
             SET status = 'READY', stable_id = $2
             WHERE id = $1 AND status IN ('COMPLETED', 'READY')
               AND (stable_id IS NULL OR stable_id = $2)",
        )
        .bind(file_id)
        .bind(accession_id)
        .execute(&self.pool)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DatabaseError::AccessionConflict(file_id)
            }
            _ => DatabaseError::Sql(err),
        })?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::AccessionConflict(file_id));
        }

        Ok(())
    }

    /// Associates accession ids with a dataset. Re-delivered mappings are
    /// absorbed by the conflict clause.
    pub async fn map_dataset(
        &self,
        dataset_id: &str,
        accession_ids: &[String],
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO local_ega.dataset_mappings (dataset_id, accession_id)
             SELECT $1, unnest($2::text[])
             ON CONFLICT (dataset_id, accession_id) DO NOTHING",
        )
        .bind(dataset_id)
        .bind(accession_ids)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Parks a file in the ERROR sink; only an operator moves it out.
    pub async fn set_error(&self, file_id: i64) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE local_ega.files SET status = 'ERROR' WHERE id = $1")
            .bind(file_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// The archive location of a verified file, for the backup pass.
    pub async fn get_archived(
        &self,
        user: &str,
        inbox_path: &str,
    ) -> Result<ArchivedFile, DatabaseError> {
        let row: Option<(i64, Option<String>, Option<String>, Option<i64>)> = sqlx::query_as(
            "SELECT id, archive_path, archive_file_checksum, archive_file_size
             FROM local_ega.files
             WHERE submission_user = $1 AND inbox_path = $2
               AND status IN ('COMPLETED', 'READY')
             ORDER BY id DESC LIMIT 1",
        )
        .bind(user)
        .bind(inbox_path)
        .fetch_optional(&self.pool)
        .await?;

        let (id, archive_path, checksum, size) = row.ok_or(DatabaseError::NotFound)?;

        match (archive_path, checksum, size) {
            (Some(archive_path), Some(checksum), Some(size)) => Ok(ArchivedFile {
                id,
                archive_path,
                checksum,
                size,
            }),
            _ => Err(DatabaseError::NotFound),
        }
    }

    pub async fn mark_backed_up(&self, file_id: i64) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE local_ega.files SET backed_up = true WHERE id = $1")
            .bind(file_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound);
        }

        Ok(())
    }

    pub async fn ping(&self) -> Result<(), DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        conn.ping().await?;

        Ok(())
    }

    /// Connectivity maintenance: safe to call on a healthy pool, bounded
    /// retries on a broken one.
    pub async fn reconnect(&self) -> Result<(), DatabaseError> {
        let mut backoff = Duration::from_millis(200);

        for attempt in 1..=RECONNECT_ATTEMPTS {
            match self.ping().await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < RECONNECT_ATTEMPTS => {
                    tracing::warn!(attempt, error = %err, "database ping failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests;
