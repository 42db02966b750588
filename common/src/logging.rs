use std::str::FromStr;

use tracing_subscriber::{util::SubscriberInitExt, EnvFilter};

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log level: {0}")]
    InvalidLevel(String),
    #[error("failed to init logger: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

pub fn init(level: &str, json: bool) -> Result<(), LoggingError> {
    let env_filter =
        EnvFilter::from_str(level).map_err(|e| LoggingError::InvalidLevel(e.to_string()))?;

    let builder = tracing_subscriber::fmt()
        .with_line_number(true)
        .with_file(true)
        .with_env_filter(env_filter);

    if json {
        builder.json().finish().try_init()?;
    } else {
        builder.finish().try_init()?;
    }

    Ok(())
}
