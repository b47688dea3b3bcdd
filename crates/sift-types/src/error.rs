//! Error types shared across sift crates.

use thiserror::Error;

/// Error type for type-level and configuration operations.
#[derive(Debug, Error)]
pub enum SiftError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A value could not be parsed into the expected domain type
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unknown content type
    #[error("Unknown type: {0}")]
    UnknownType(String),
}
