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
    pub mapping_schema: MessageSchema,
}

impl GlobalState {
    pub fn new(
        config: AppConfig,
        ctx: Context,
        rmq: Arc<ConnectionPool>,
        db: Arc<Database>,
    ) -> Result<Self, SchemaError> {
        let mapping_schema = MessageSchema::load(&config.schemas_path, "dataset-mapping")?;

        Ok(Self {
            config,
            ctx,
            rmq,
            db,
            mapping_schema,
        })
    }
}
