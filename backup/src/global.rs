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
    pub backup: Backend,
    pub completion_schema: MessageSchema,
}

impl GlobalState {
    pub fn new(
        config: AppConfig,
        ctx: Context,
        rmq: Arc<ConnectionPool>,
        db: Arc<Database>,
        archive: Backend,
        backup: Backend,
    ) -> Result<Self, SchemaError> {
        let completion_schema = MessageSchema::load(&config.schemas_path, "ingestion-completion")?;

        Ok(Self {
            config,
            ctx,
            rmq,
            db,
            archive,
            backup,
            completion_schema,
        })
    }
}
