use common::errors::ErrorKind;
use common::schema::{DatasetMapping, MessageSchema, SchemaError};

use crate::mapper::job::JobError;

fn schemas_path() -> String {
    concat!(env!("CARGO_MANIFEST_DIR"), "/../schemas").to_string()
}

#[test]
fn test_mapping_message_parse() {
    let message: DatasetMapping = serde_json::from_str(
        r#"{
            "dataset_id": "EGAD00000000001",
            "accession_ids": ["EGAF00000000001", "EGAF00000000002"]
        }"#,
    )
    .expect("message should deserialize");

    assert_eq!(message.dataset_id, "EGAD00000000001");
    assert_eq!(message.accession_ids.len(), 2);
}

#[test]
fn test_mapping_schema_rejects_empty_accessions() {
    let schema = MessageSchema::load(&schemas_path(), "dataset-mapping")
        .expect("failed to load schema");

    let body = br#"{"dataset_id": "EGAD1", "accession_ids": []}"#;
    let err = schema.validate(body).expect_err("must be rejected");
    assert!(matches!(err, SchemaError::Invalid { .. }));
}

#[test]
fn test_schema_error_is_malformed() {
    let schema = MessageSchema::load(&schemas_path(), "dataset-mapping")
        .expect("failed to load schema");

    let err = JobError::from(schema.validate(b"{}").expect_err("must be rejected"));
    assert_eq!(err.kind(), ErrorKind::Malformed);
}
