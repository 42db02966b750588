use anyhow::Result;
use common::config::{BrokerConfig, C4ghConfig, DatabaseConfig, LoggingConfig, StorageConfig};
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

    /// Archive storage configuration
    pub archive: StorageConfig,

    /// Crypt4GH key configuration
    pub c4gh: C4ghConfig,

    /// Directory the message schemas are loaded from
    pub schemas_path: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "sda-verify".to_string(),
            config_file: "config".to_string(),
            logging: LoggingConfig::default(),
            broker: BrokerConfig {
                queue: "archived".to_string(),
                routing_key: "accession".to_string(),
                ..Default::default()
            },
            database: DatabaseConfig::default(),
            archive: StorageConfig::default(),
            c4gh: C4ghConfig::default(),
            schemas_path: "schemas".to_string(),
        }
    }
}

impl AppConfig {
    pub fn parse() -> Result<Self> {
        Ok(common::config::parse(&AppConfig::default().config_file)?)
    }
}
