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
    pub inbox: Backend,
    pub archive: Backend,
    pub trigger_schema: MessageSchema,
    pub verification_schema: MessageSchema,
}

impl GlobalState {
    pub fn new(
        config: AppConfig,
        ctx: Context,
        rmq: Arc<ConnectionPool>,
        db: Arc<Database>,
        inbox: Backend,
        archive: Backend,
    ) -> Result<Self, SchemaError> {
        let trigger_schema = MessageSchema::load(&config.schemas_path, "ingestion-trigger")?;
        let verification_schema =
            MessageSchema::load(&config.schemas_path, "ingestion-verification")?;

        Ok(Self {
            config,
            ctx,
            rmq,
            db,
            inbox,
            archive,
            trigger_schema,
            verification_schema,
        })
    }
}
