//! Error types for the Sealroom client shell

use thiserror::Error;

use crate::crypto::errors::CryptoError;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config file error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
