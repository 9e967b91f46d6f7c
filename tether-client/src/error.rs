//! Error types for the client layer.

use tether_core::{ConfigError, StoreError, TetherError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Core(#[from] TetherError),
    #[error("Missing configuration file path (use --config or TETHER_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to decode push frame: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Failed to initialise tracing: {0}")]
    Telemetry(String),
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<ConfigError> for ClientError {
    fn from(err: ConfigError) -> Self {
        ClientError::Core(err.into())
    }
}

impl From<StoreError> for ClientError {
    fn from(err: StoreError) -> Self {
        ClientError::Core(err.into())
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
