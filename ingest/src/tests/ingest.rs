use common::c4gh::read_header;
use common::config::{PosixConfig, StorageConfig};
use common::storage::Backend;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::ingest::job::stash_object;

async fn posix_backend(root: &std::path::Path) -> Backend {
    Backend::new(&StorageConfig::Posix(PosixConfig {
        path: root.display().to_string(),
    }))
    .await
    .expect("failed to create backend")
}

fn synthetic_upload(body: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut header = Vec::new();
    header.extend_from_slice(b"crypt4gh");
    header.extend_from_slice(&1u32.to_le_bytes());
    header.extend_from_slice(&1u32.to_le_bytes());
    let packet = b"wrapped session key material";
    header.extend_from_slice(&(packet.len() as u32 + 4).to_le_bytes());
    header.extend_from_slice(packet);

    let mut upload = header.clone();
    upload.extend_from_slice(body);

    (header, upload)
}

#[tokio::test]
async fn test_header_peel_and_archive_copy() {
    let inbox_dir = tempfile::tempdir().expect("failed to create temp dir");
    let archive_dir = tempfile::tempdir().expect("failed to create temp dir");

    let inbox = posix_backend(inbox_dir.path()).await;
    let archive = posix_backend(archive_dir.path()).await;

    let body = b"encrypted data segments".repeat(5000);
    let (header, upload) = synthetic_upload(&body);

    let mut writer = inbox
        .file_writer("uploads/sample.c4gh")
        .await
        .expect("failed to create inbox writer");
    writer.write_all(&upload).await.expect("write failed");
    writer.finish().await.expect("finish failed");

    // The ingest flow: open the upload, split the header off, stream the
    // rest into the archive while hashing it.
    let mut reader = inbox
        .file_reader("uploads/sample.c4gh")
        .await
        .expect("failed to open upload");
    let peeled = read_header(&mut reader).await.expect("failed to peel header");
    assert_eq!(peeled, header);

    let mut writer = archive
        .file_writer("archived-object")
        .await
        .expect("failed to create archive writer");
    let (size, checksum) = stash_object(reader, &mut writer)
        .await
        .expect("copy failed");
    writer.finish().await.expect("finish failed");

    assert_eq!(size, body.len() as i64);
    assert_eq!(checksum, hex::encode(Sha256::digest(&body)));

    let mut archived = Vec::new();
    archive
        .file_reader("archived-object")
        .await
        .expect("failed to open archived object")
        .read_to_end(&mut archived)
        .await
        .expect("read failed");
    assert_eq!(archived, body, "the stored object must not contain the header");
}

#[tokio::test]
async fn test_garbage_upload_is_rejected() {
    let inbox_dir = tempfile::tempdir().expect("failed to create temp dir");
    let inbox = posix_backend(inbox_dir.path()).await;

    let mut writer = inbox
        .file_writer("uploads/garbage")
        .await
        .expect("failed to create inbox writer");
    writer
        .write_all(b"this is not a crypt4gh stream")
        .await
        .expect("write failed");
    writer.finish().await.expect("finish failed");

    let mut reader = inbox
        .file_reader("uploads/garbage")
        .await
        .expect("failed to open upload");
    assert!(read_header(&mut reader).await.is_err());
}

#[tokio::test]
async fn test_stash_object_empty_body() {
    let archive_dir = tempfile::tempdir().expect("failed to create temp dir");
    let archive = posix_backend(archive_dir.path()).await;

    let mut writer = archive
        .file_writer("empty")
        .await
        .expect("failed to create writer");
    let (size, checksum) = stash_object(Box::new(std::io::Cursor::new(Vec::new())), &mut writer)
        .await
        .expect("copy failed");
    writer.finish().await.expect("finish failed");

    assert_eq!(size, 0);
    assert_eq!(
        checksum,
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
}
