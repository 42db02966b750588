use std::path::Path;

use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to compile schema {name}: {reason}")]
    Compile { name: String, reason: String },
    #[error("message rejected by schema {name}: {reason}")]
    Invalid { name: String, reason: String },
}

/// One compiled message contract. Schema files are versioned on disk; the
/// file name is the contract name.
pub struct MessageSchema {
    name: String,
    schema: JSONSchema,
}

impl MessageSchema {
    pub fn load(schemas_path: &str, name: &str) -> Result<Self, SchemaError> {
        let raw = std::fs::read(Path::new(schemas_path).join(format!("{name}.json")))?;
        let document: serde_json::Value = serde_json::from_slice(&raw)?;

        let schema = JSONSchema::compile(&document).map_err(|e| SchemaError::Compile {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            name: name.to_string(),
            schema,
        })
    }

    /// Validates raw bytes and hands back the parsed document, so callers
    /// only deserialize bodies that passed the contract.
    pub fn validate(&self, body: &[u8]) -> Result<serde_json::Value, SchemaError> {
        let value: serde_json::Value = serde_json::from_slice(body)?;
        self.check(&value)?;

        Ok(value)
    }

    /// Validates an already-built document, used before publishing.
    pub fn check(&self, value: &serde_json::Value) -> Result<(), SchemaError> {
        if let Err(errors) = self.schema.validate(value) {
            let reason = errors
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");

            return Err(SchemaError::Invalid {
                name: self.name.clone(),
                reason,
            });
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Sha256,
    Md5,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    #[serde(rename = "type")]
    pub algorithm: ChecksumAlgorithm,
    pub value: String,
}

impl Checksum {
    pub fn sha256(value: impl Into<String>) -> Self {
        Self {
            algorithm: ChecksumAlgorithm::Sha256,
            value: value.into(),
        }
    }

    pub fn md5(value: impl Into<String>) -> Self {
        Self {
            algorithm: ChecksumAlgorithm::Md5,
            value: value.into(),
        }
    }
}

/// Picks the digest of one algorithm out of a checksum list.
pub fn find_checksum(checksums: &[Checksum], algorithm: ChecksumAlgorithm) -> Option<&str> {
    checksums
        .iter()
        .find(|c| c.algorithm == algorithm)
        .map(|c| c.value.as_str())
}

/// Inbox notification consumed by ingest (`ingestion-trigger.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionTrigger {
    pub user: String,
    pub filepath: String,
}

/// Archive notification consumed by verify (`ingestion-verification.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionVerification {
    pub user: String,
    pub filepath: String,
    pub file_id: i64,
    pub archive_path: String,
    pub encrypted_checksums: Vec<Checksum>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub re_verify: Option<bool>,
}

/// Accession request published by verify
/// (`ingestion-accession-request.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessionRequest {
    pub user: String,
    pub filepath: String,
    pub decrypted_checksums: Vec<Checksum>,
}

/// Accession assignment consumed by finalize (`ingestion-accession.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionAccession {
    pub user: String,
    pub filepath: String,
    pub accession_id: String,
    pub decrypted_checksums: Vec<Checksum>,
}

/// Completion notice published by finalize and consumed by backup
/// (`ingestion-completion.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionCompletion {
    pub user: String,
    pub filepath: String,
    pub accession_id: String,
    pub decrypted_checksums: Vec<Checksum>,
}

/// Dataset association consumed by mapper (`dataset-mapping.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetMapping {
    pub dataset_id: String,
    pub accession_ids: Vec<String>,
}

#[cfg(test)]
mod tests;
