use serde::de::DeserializeOwned;
use serde::Deserialize;

pub use ::config::ConfigError;

/// Prefix for environment variable overrides, e.g. `SDA_BROKER_HOST`.
pub const ENV_PREFIX: &str = "SDA";

/// Layered configuration: an optional config file (toml/yaml/json) overlaid
/// with `SDA_`-prefixed environment variables. The file location itself can
/// be overridden with `SDA_CONFIG_FILE`.
pub fn parse<C: DeserializeOwned>(config_file: &str) -> Result<C, ConfigError> {
    let path = std::env::var("SDA_CONFIG_FILE").unwrap_or_else(|_| config_file.to_string());

    let mut builder = ::config::Config::builder();

    if !path.is_empty() {
        builder = builder.add_source(::config::File::with_name(&path).required(false));
    }

    builder
        .add_source(::config::Environment::with_prefix(ENV_PREFIX).separator("_"))
        .build()?
        .try_deserialize()
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// The log level to use, this is a tracing env filter
    pub level: String,

    /// If we should use JSON logging
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    /// Hostname of the AMQP broker
    pub host: String,

    /// Port of the AMQP broker
    pub port: u16,

    /// The username to use for authentication
    pub user: String,

    /// The password to use for authentication
    pub password: String,

    /// The vhost to connect to
    pub vhost: String,

    /// Use amqps instead of amqp
    pub ssl: bool,

    /// The exchange all messages are published to
    pub exchange: String,

    /// The queue this service consumes from
    pub queue: String,

    /// Routing key for messages published to the next pipeline stage
    pub routing_key: String,

    /// Routing key for dead-lettered messages
    pub routing_error: String,

    /// Publish messages as persistent
    pub durable: bool,

    /// Per-consumer prefetch count, bounds in-flight deliveries
    pub prefetch: u16,

    /// Number of broker connections to keep in the pool
    pub pool_size: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            user: "guest".to_string(),
            password: "guest".to_string(),
            vhost: "/".to_string(),
            ssl: false,
            exchange: "sda".to_string(),
            queue: String::new(),
            routing_key: String::new(),
            routing_error: "error".to_string(),
            durable: true,
            prefetch: 2,
            pool_size: 1,
        }
    }
}

impl BrokerConfig {
    pub fn uri(&self) -> String {
        let scheme = if self.ssl { "amqps" } else { "amqp" };
        let vhost = self.vhost.trim_start_matches('/');

        format!(
            "{}://{}:{}@{}:{}/{}",
            scheme, self.user, self.password, self.host, self.port, vhost
        )
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Hostname of the postgres server
    pub host: String,

    /// Port of the postgres server
    pub port: u16,

    /// The username to use for authentication
    pub user: String,

    /// The password to use for authentication
    pub password: String,

    /// The database to connect to
    pub database: String,

    /// Postgres ssl mode (disable, prefer, require, verify-ca, verify-full)
    pub sslmode: String,

    /// The path to the CA certificate used to verify the server
    pub ca_cert: Option<String>,

    /// The path to the TLS client certificate
    pub client_cert: Option<String>,

    /// The path to the TLS client key
    pub client_key: Option<String>,

    /// Number of connections to keep in the pool
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "lega_in".to_string(),
            password: String::new(),
            database: "lega".to_string(),
            sslmode: "prefer".to_string(),
            ca_cert: None,
            client_cert: None,
            client_key: None,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    Posix(PosixConfig),
    S3(S3Config),
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Posix(PosixConfig::default())
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PosixConfig {
    /// Root directory all object paths are resolved under
    pub path: String,
}

impl Default for PosixConfig {
    fn default() -> Self {
        Self {
            path: "./data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct S3Config {
    /// URL of the S3 endpoint
    pub endpoint: String,

    /// Region, kept configurable for AWS-hosted buckets
    pub region: String,

    /// The bucket objects are stored in
    pub bucket: String,

    /// Access key id
    pub access_key: String,

    /// Secret access key
    pub secret_key: String,

    /// The path to an extra CA bundle used to verify the endpoint
    pub ca_cert: Option<String>,

    /// Multipart upload part size in bytes
    pub part_size: usize,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".to_string(),
            region: "us-east-1".to_string(),
            bucket: "archive".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            ca_cert: None,
            part_size: 8 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct C4ghConfig {
    /// The path to the Crypt4GH private key
    pub key_path: String,

    /// Passphrase unlocking the private key
    pub passphrase: String,
}

impl Default for C4ghConfig {
    fn default() -> Self {
        Self {
            key_path: "c4gh.sec.pem".to_string(),
            passphrase: String::new(),
        }
    }
}

#[cfg(test)]
mod tests;
