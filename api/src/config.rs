use anyhow::Result;
use common::config::{BrokerConfig, DatabaseConfig, LoggingConfig};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    /// The address the server binds to
    pub host: String,

    /// The port the server binds to
    pub port: u16,

    /// The path to the TLS certificate; TLS is enabled when both cert and
    /// key are set
    pub server_cert: Option<String>,

    /// The path to the TLS private key
    pub server_key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            server_cert: None,
            server_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Name of this instance
    pub name: String,

    /// The path to the config file.
    pub config_file: String,

    /// The log level to use, this is a tracing env filter
    pub logging: LoggingConfig,

    /// HTTP server configuration
    pub api: ApiConfig,

    /// Broker configuration, probed for readiness
    pub broker: BrokerConfig,

    /// Database configuration, probed for readiness
    pub database: DatabaseConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "sda-api".to_string(),
            config_file: "config".to_string(),
            logging: LoggingConfig::default(),
            api: ApiConfig::default(),
            broker: BrokerConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn parse() -> Result<Self> {
        Ok(common::config::parse(&AppConfig::default().config_file)?)
    }
}
