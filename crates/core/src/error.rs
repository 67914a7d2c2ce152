//! Core error types

use thiserror::Error;

/// Core error type for fedreg
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed boundary value (round id, version tag, digest, identity)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration file could not be parsed
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
