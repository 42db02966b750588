use anyhow::Result;
use common::config::{BrokerConfig, DatabaseConfig, LoggingConfig};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Name of this instance, used as the consumer tag
    pub name: String,

    /// The path to the config file.
    pub config_file: String,

    /// The log level to use, this is a tracing env filter
    pub logging: LoggingConfig,

    /// Broker configuration
    pub broker: BrokerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Directory the message schemas are loaded from
    pub schemas_path: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "sda-finalize".to_string(),
            config_file: "config".to_string(),
            logging: LoggingConfig::default(),
            broker: BrokerConfig {
                queue: "accession".to_string(),
                routing_key: "completed".to_string(),
                ..Default::default()
            },
            database: DatabaseConfig::default(),
            schemas_path: "schemas".to_string(),
        }
    }
}

impl AppConfig {
    pub fn parse() -> Result<Self> {
        Ok(common::config::parse(&AppConfig::default().config_file)?)
    }
}
