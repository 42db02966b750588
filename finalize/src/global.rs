use std::sync::Arc;

use common::context::Context;
use common::database::Database;
use common::rmq::ConnectionPool;
use common::schema::{MessageSchema, SchemaError};

use crate::config::AppConfig;

pub struct GlobalState {
    pub config: AppConfig,
    pub ctx: Context,
    pub rmq: Arc<ConnectionPool>,
    pub db: Arc<Database>,
    pub accession_schema: MessageSchema,
    pub completion_schema: MessageSchema,
}

impl GlobalState {
    pub fn new(
        config: AppConfig,
        ctx: Context,
        rmq: Arc<ConnectionPool>,
        db: Arc<Database>,
    ) -> Result<Self, SchemaError> {
        let accession_schema = MessageSchema::load(&config.schemas_path, "ingestion-accession")?;
        let completion_schema = MessageSchema::load(&config.schemas_path, "ingestion-completion")?;

        Ok(Self {
            config,
            ctx,
            rmq,
            db,
            accession_schema,
            completion_schema,
        })
    }
}
