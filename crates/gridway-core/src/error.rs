//! Core error types.

use thiserror::Error;

/// Errors raised while decoding modes or resolving configuration.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid execution mode: {0}")]
    InvalidMode(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("config file error: {0}")]
    ConfigFile(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
