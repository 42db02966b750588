use aws_config::Region;
use aws_sdk_s3::config::{Credentials, SharedCredentialsProvider};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_smithy_runtime::client::http::hyper_014::HyperClientBuilder;
use bytes::{Bytes, BytesMut};
use tokio::io::AsyncRead;

use super::StorageError;
use crate::config::S3Config;

/// S3 multipart parts must be at least 5 MiB, except for the last one.
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// S3-compatible storage, addressed path-style so non-AWS endpoints work.
pub struct S3Backend {
    client: aws_sdk_s3::Client,
    bucket: String,
    part_size: usize,
}

impl S3Backend {
    pub fn new(config: &S3Config) -> Result<Self, StorageError> {
        let mut builder = aws_sdk_s3::Config::builder()
            .endpoint_url(&config.endpoint)
            .region(Region::new(config.region.clone()))
            .force_path_style(true)
            .credentials_provider(SharedCredentialsProvider::new(Credentials::new(
                config.access_key.clone(),
                config.secret_key.clone(),
                None,
                None,
                "ConfiguredCredentialsProvider",
            )));

        if let Some(ca_cert) = &config.ca_cert {
            builder = builder.http_client(https_client_with_ca(ca_cert)?);
        }

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            part_size: config.part_size.max(MIN_PART_SIZE),
        })
    }

    pub async fn get_file_size(&self, path: &str) -> Result<i64, StorageError> {
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(path.trim_start_matches('/'))
            .send()
            .await?;

        head.content_length().ok_or(StorageError::NoContentLength)
    }

    pub async fn file_reader(
        &self,
        path: &str,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>, StorageError> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path.trim_start_matches('/'))
            .send()
            .await?;

        Ok(Box::new(object.body.into_async_read()))
    }

    pub async fn file_writer(&self, path: &str) -> Result<S3Writer, StorageError> {
        let key = path.trim_start_matches('/').to_string();

        let upload = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await?;

        let upload_id = upload
            .upload_id()
            .ok_or(StorageError::MissingUploadId)?
            .to_string();

        Ok(S3Writer {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key,
            upload_id,
            part_number: 1,
            parts: Vec::new(),
            buffer: BytesMut::new(),
            part_size: self.part_size,
        })
    }

    pub async fn remove(&self, path: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(path.trim_start_matches('/'))
            .send()
            .await?;

        Ok(())
    }
}

/// Streaming writer on top of a multipart upload. Buffers at most one part
/// in memory; the object appears atomically when the upload completes.
pub struct S3Writer {
    client: aws_sdk_s3::Client,
    bucket: String,
    key: String,
    upload_id: String,
    part_number: i32,
    parts: Vec<CompletedPart>,
    buffer: BytesMut,
    part_size: usize,
}

impl S3Writer {
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), StorageError> {
        self.buffer.extend_from_slice(buf);

        while self.buffer.len() >= self.part_size {
            let part = self.buffer.split_to(self.part_size).freeze();
            self.upload_part(part).await?;
        }

        Ok(())
    }

    async fn upload_part(&mut self, body: Bytes) -> Result<(), StorageError> {
        let response = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .part_number(self.part_number)
            .body(ByteStream::from(body))
            .send()
            .await?;

        self.parts.push(
            CompletedPart::builder()
                .part_number(self.part_number)
                .set_e_tag(response.e_tag().map(str::to_string))
                .build(),
        );
        self.part_number += 1;

        Ok(())
    }

    pub async fn finish(mut self) -> Result<(), StorageError> {
        // The final part may be short; an empty object still needs one part.
        if !self.buffer.is_empty() || self.parts.is_empty() {
            let part = self.buffer.split().freeze();
            self.upload_part(part).await?;
        }

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(self.parts))
                    .build(),
            )
            .send()
            .await?;

        Ok(())
    }

    pub async fn abort(self) {
        let result = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .send()
            .await;

        if let Err(err) = result {
            tracing::debug!("failed to abort multipart upload: {}", err);
        }
    }
}

fn https_client_with_ca(
    path: &str,
) -> Result<aws_smithy_runtime_api::client::http::SharedHttpClient, StorageError> {
    let pem = std::fs::read(path)?;

    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut pem.as_slice())? {
        roots
            .add(&rustls::Certificate(cert))
            .map_err(|e| StorageError::Tls(e.to_string()))?;
    }

    let tls = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(tls)
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .build();

    Ok(HyperClientBuilder::new().build(connector))
}
