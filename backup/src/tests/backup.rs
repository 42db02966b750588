use common::config::{PosixConfig, StorageConfig};
use common::storage::Backend;
use sha2::{Digest, Sha256};

use crate::backup::job::{copy_object, hash_object};

async fn posix_backend(root: &std::path::Path) -> Backend {
    Backend::new(&StorageConfig::Posix(PosixConfig {
        path: root.display().to_string(),
    }))
    .await
    .expect("failed to create backend")
}

async fn put_object(backend: &Backend, path: &str, data: &[u8]) {
    let mut writer = backend
        .file_writer(path)
        .await
        .expect("failed to create writer");
    writer.write_all(data).await.expect("write failed");
    writer.finish().await.expect("finish failed");
}

#[tokio::test]
async fn test_copy_and_read_back() {
    let archive_dir = tempfile::tempdir().expect("failed to create temp dir");
    let backup_dir = tempfile::tempdir().expect("failed to create temp dir");

    let archive = posix_backend(archive_dir.path()).await;
    let backup = posix_backend(backup_dir.path()).await;

    let data = b"archived object bytes".repeat(9000);
    put_object(&archive, "objects/abc", &data).await;

    copy_object(&archive, &backup, "objects/abc")
        .await
        .expect("copy failed");

    let (size, checksum) = hash_object(&backup, "objects/abc")
        .await
        .expect("read-back failed");

    assert_eq!(size, data.len() as i64);
    assert_eq!(checksum, hex::encode(Sha256::digest(&data)));
}

#[tokio::test]
async fn test_read_back_detects_corruption() {
    let backup_dir = tempfile::tempdir().expect("failed to create temp dir");
    let backup = posix_backend(backup_dir.path()).await;

    let data = b"pristine bytes".to_vec();
    let recorded = hex::encode(Sha256::digest(&data));

    let mut corrupted = data;
    corrupted[0] ^= 1;
    put_object(&backup, "objects/abc", &corrupted).await;

    let (_, checksum) = hash_object(&backup, "objects/abc")
        .await
        .expect("read-back failed");

    assert_ne!(checksum, recorded);
}

#[tokio::test]
async fn test_copy_missing_source() {
    let archive_dir = tempfile::tempdir().expect("failed to create temp dir");
    let backup_dir = tempfile::tempdir().expect("failed to create temp dir");

    let archive = posix_backend(archive_dir.path()).await;
    let backup = posix_backend(backup_dir.path()).await;

    assert!(copy_object(&archive, &backup, "missing").await.is_err());
}
