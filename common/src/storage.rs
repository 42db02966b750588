use aws_sdk_s3::operation::abort_multipart_upload::AbortMultipartUploadError;
use aws_sdk_s3::operation::complete_multipart_upload::CompleteMultipartUploadError;
use aws_sdk_s3::operation::create_multipart_upload::CreateMultipartUploadError;
use aws_sdk_s3::operation::delete_object::DeleteObjectError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::upload_part::UploadPartError;
use tokio::io::AsyncRead;

use crate::config::StorageConfig;

pub use self::posix::{PosixBackend, PosixWriter};
pub use self::s3::{S3Backend, S3Writer};

mod posix;
mod s3;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("head: {0}")]
    Head(#[from] SdkError<HeadObjectError>),
    #[error("read: {0}")]
    Read(#[from] SdkError<GetObjectError>),
    #[error("delete: {0}")]
    Delete(#[from] SdkError<DeleteObjectError>),
    #[error("create multipart upload: {0}")]
    CreateMultipart(#[from] SdkError<CreateMultipartUploadError>),
    #[error("upload part: {0}")]
    UploadPart(#[from] SdkError<UploadPartError>),
    #[error("complete multipart upload: {0}")]
    CompleteMultipart(#[from] SdkError<CompleteMultipartUploadError>),
    #[error("abort multipart upload: {0}")]
    AbortMultipart(#[from] SdkError<AbortMultipartUploadError>),
    #[error("multipart upload has no upload id")]
    MissingUploadId,
    #[error("object has no content length")]
    NoContentLength,
    #[error("tls: {0}")]
    Tls(String),
}

/// One of the supported object storage backends. Paths are opaque keys;
/// only ingest assigns them.
pub enum Backend {
    Posix(PosixBackend),
    S3(S3Backend),
}

impl Backend {
    pub async fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        match config {
            StorageConfig::Posix(posix) => Ok(Self::Posix(PosixBackend::new(posix).await?)),
            StorageConfig::S3(s3) => Ok(Self::S3(S3Backend::new(s3)?)),
        }
    }

    pub async fn get_file_size(&self, path: &str) -> Result<i64, StorageError> {
        match self {
            Self::Posix(backend) => backend.get_file_size(path).await,
            Self::S3(backend) => backend.get_file_size(path).await,
        }
    }

    /// A sequential reader over the object. Resuming means re-opening.
    pub async fn file_reader(
        &self,
        path: &str,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>, StorageError> {
        match self {
            Self::Posix(backend) => backend.file_reader(path).await,
            Self::S3(backend) => backend.file_reader(path).await,
        }
    }

    /// A sink for a new object. Nothing is visible under `path` until
    /// `finish()` returns: posix writes a temporary name and renames, S3
    /// completes a multipart upload.
    pub async fn file_writer(&self, path: &str) -> Result<FileWriter, StorageError> {
        match self {
            Self::Posix(backend) => Ok(FileWriter::Posix(backend.file_writer(path).await?)),
            Self::S3(backend) => Ok(FileWriter::S3(backend.file_writer(path).await?)),
        }
    }

    pub async fn remove(&self, path: &str) -> Result<(), StorageError> {
        match self {
            Self::Posix(backend) => backend.remove(path).await,
            Self::S3(backend) => backend.remove(path).await,
        }
    }
}

pub enum FileWriter {
    Posix(PosixWriter),
    S3(S3Writer),
}

impl FileWriter {
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), StorageError> {
        match self {
            Self::Posix(writer) => writer.write_all(buf).await,
            Self::S3(writer) => writer.write_all(buf).await,
        }
    }

    /// Makes the object visible at its final path.
    pub async fn finish(self) -> Result<(), StorageError> {
        match self {
            Self::Posix(writer) => writer.finish().await,
            Self::S3(writer) => writer.finish().await,
        }
    }

    /// Drops whatever was written so far without publishing the object.
    pub async fn abort(self) {
        match self {
            Self::Posix(writer) => writer.abort().await,
            Self::S3(writer) => writer.abort().await,
        }
    }
}
