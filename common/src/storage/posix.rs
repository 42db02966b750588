use std::path::PathBuf;

use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use uuid::Uuid;

use super::StorageError;
use crate::config::PosixConfig;

/// Filesystem-backed storage under a root directory. Object paths are
/// resolved relative to the root.
pub struct PosixBackend {
    root: PathBuf,
}

impl PosixBackend {
    pub async fn new(config: &PosixConfig) -> Result<Self, StorageError> {
        let root = PathBuf::from(&config.path);

        if !root.exists() {
            fs::create_dir_all(&root).await?;
        }

        Ok(Self { root })
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    pub async fn get_file_size(&self, path: &str) -> Result<i64, StorageError> {
        Ok(fs::metadata(self.resolve(path)).await?.len() as i64)
    }

    pub async fn file_reader(
        &self,
        path: &str,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>, StorageError> {
        let file = fs::File::open(self.resolve(path)).await?;

        Ok(Box::new(file))
    }

    pub async fn file_writer(&self, path: &str) -> Result<PosixWriter, StorageError> {
        let final_path = self.resolve(path);

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // A crashed writer leaves a .part file behind, never a half-written
        // object at the final path.
        let tmp_path = final_path.with_extension(format!("{}.part", Uuid::new_v4()));
        let file = fs::File::create(&tmp_path).await?;

        Ok(PosixWriter {
            file,
            tmp_path,
            final_path,
        })
    }

    pub async fn remove(&self, path: &str) -> Result<(), StorageError> {
        fs::remove_file(self.resolve(path)).await?;

        Ok(())
    }
}

pub struct PosixWriter {
    file: fs::File,
    tmp_path: PathBuf,
    final_path: PathBuf,
}

impl PosixWriter {
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), StorageError> {
        self.file.write_all(buf).await?;

        Ok(())
    }

    pub async fn finish(mut self) -> Result<(), StorageError> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        fs::rename(&self.tmp_path, &self.final_path).await?;

        Ok(())
    }

    pub async fn abort(self) {
        drop(self.file);
        if let Err(err) = fs::remove_file(&self.tmp_path).await {
            tracing::debug!("failed to remove temporary file: {}", err);
        }
    }
}
