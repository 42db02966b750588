use std::sync::Arc;

use common::context::Context;
use common::database::Database;
use common::rmq::ConnectionPool;
use common::schema::{MessageSchema, SchemaError};
use common::storage::Backend;

use crate::config::AppConfig;

pub struct GlobalState {
    pub config: AppConfig,
    pub ctx: Context,
    pub rmq: Arc<ConnectionPool>,
    pub db: Arc<Database>,
    pub archive: Backend,
    /// Process-global decryption key, immutable after load
    pub keys: Arc<Vec<crypt4gh::Keys>>,
    pub verification_schema: MessageSchema,
    pub accession_request_schema: MessageSchema,
}

impl GlobalState {
    pub fn new(
        config: AppConfig,
        ctx: Context,
        rmq: Arc<ConnectionPool>,
        db: Arc<Database>,
        archive: Backend,
        keys: Vec<crypt4gh::Keys>,
    ) -> Result<Self, SchemaError> {
        let verification_schema =
            MessageSchema::load(&config.schemas_path, "ingestion-verification")?;
        let accession_request_schema =
            MessageSchema::load(&config.schemas_path, "ingestion-accession-request")?;

        Ok(Self {
            config,
            ctx,
            rmq,
            db,
            archive,
            keys: Arc::new(keys),
            verification_schema,
            accession_request_schema,
        })
    }
}
