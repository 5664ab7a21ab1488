//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that stop the exporter from starting.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("unknown scrape mode {0:?} (expected \"on_demand\" or \"cached\")")]
    UnknownMode(String),

    #[error("invalid server id {0:?}: must be a numeric Ookla server id")]
    InvalidServerId(String),

    #[error("invalid {field} {value:?}: expected a positive duration like 30s, 2m or 1h")]
    InvalidDuration { field: &'static str, value: String },

    #[error("invalid port {0:?}")]
    InvalidPort(String),

    #[error("invalid listen address {0:?}")]
    InvalidAddress(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
