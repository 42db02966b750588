use serde_json::json;

use super::*;

fn schemas_path() -> String {
    concat!(env!("CARGO_MANIFEST_DIR"), "/../schemas").to_string()
}

#[test]
fn test_load_all_contracts() {
    for name in [
        "ingestion-trigger",
        "ingestion-verification",
        "ingestion-accession-request",
        "ingestion-accession",
        "ingestion-completion",
        "dataset-mapping",
    ] {
        MessageSchema::load(&schemas_path(), name)
            .unwrap_or_else(|e| panic!("failed to load {name}: {e}"));
    }
}

#[test]
fn test_load_missing_schema() {
    assert!(MessageSchema::load(&schemas_path(), "no-such-contract").is_err());
}

#[test]
fn test_verification_accepts_valid_body() {
    let schema = MessageSchema::load(&schemas_path(), "ingestion-verification")
        .expect("failed to load schema");

    let body = serde_json::to_vec(&json!({
        "user": "alice",
        "filepath": "inbox/a.c4gh",
        "file_id": 7,
        "archive_path": "archive/3e1c9a",
        "encrypted_checksums": [
            {"type": "sha256", "value": "ab".repeat(32)}
        ]
    }))
    .expect("failed to serialize");

    let value = schema.validate(&body).expect("body should validate");

    let message: IngestionVerification =
        serde_json::from_value(value).expect("body should deserialize");
    assert_eq!(message.file_id, 7);
    assert_eq!(message.re_verify, None);
}

#[test]
fn test_verification_rejects_bad_file_id() {
    let schema = MessageSchema::load(&schemas_path(), "ingestion-verification")
        .expect("failed to load schema");

    let body = serde_json::to_vec(&json!({
        "user": "alice",
        "filepath": "inbox/a.c4gh",
        "file_id": "not-an-int",
        "archive_path": "archive/3e1c9a",
        "encrypted_checksums": [
            {"type": "sha256", "value": "ab".repeat(32)}
        ]
    }))
    .expect("failed to serialize");

    let err = schema.validate(&body).expect_err("body must be rejected");
    assert!(matches!(err, SchemaError::Invalid { .. }));
}

#[test]
fn test_verification_rejects_missing_checksums() {
    let schema = MessageSchema::load(&schemas_path(), "ingestion-verification")
        .expect("failed to load schema");

    let body = serde_json::to_vec(&json!({
        "user": "alice",
        "filepath": "inbox/a.c4gh",
        "file_id": 7,
        "archive_path": "archive/3e1c9a",
        "encrypted_checksums": []
    }))
    .expect("failed to serialize");

    assert!(schema.validate(&body).is_err());
}

#[test]
fn test_validate_rejects_non_json() {
    let schema = MessageSchema::load(&schemas_path(), "ingestion-trigger")
        .expect("failed to load schema");

    assert!(schema.validate(b"not json at all").is_err());
}

#[test]
fn test_accession_request_requires_both_digests() {
    let schema = MessageSchema::load(&schemas_path(), "ingestion-accession-request")
        .expect("failed to load schema");

    let message = AccessionRequest {
        user: "alice".to_string(),
        filepath: "inbox/a.c4gh".to_string(),
        decrypted_checksums: vec![Checksum::sha256("ab".repeat(32))],
    };
    let value = serde_json::to_value(&message).expect("failed to serialize");
    assert!(
        schema.check(&value).is_err(),
        "a single digest must be rejected"
    );

    let message = AccessionRequest {
        decrypted_checksums: vec![
            Checksum::sha256("ab".repeat(32)),
            Checksum::md5("cd".repeat(16)),
        ],
        ..message
    };
    let value = serde_json::to_value(&message).expect("failed to serialize");
    schema.check(&value).expect("both digests should validate");
}

#[test]
fn test_checksum_serde_tags() {
    let checksum = Checksum::md5("d41d8cd98f00b204e9800998ecf8427e");
    let value = serde_json::to_value(&checksum).expect("failed to serialize");

    assert_eq!(
        value,
        json!({"type": "md5", "value": "d41d8cd98f00b204e9800998ecf8427e"})
    );
}

#[test]
fn test_find_checksum() {
    let md5 = "bb".repeat(16);
    let checksums = vec![Checksum::sha256("aa".repeat(32)), Checksum::md5(&md5)];

    assert_eq!(
        find_checksum(&checksums, ChecksumAlgorithm::Md5),
        Some(md5.as_str())
    );
    assert_eq!(
        find_checksum(&checksums[..1], ChecksumAlgorithm::Md5),
        None
    );
}
