//! Error types for the indexing pipeline.

use sift_search::SearchError;
use sift_types::SiftError;
use thiserror::Error;

/// Errors that can occur while writing documents
#[derive(Error, Debug)]
pub enum IndexingError {
    /// Engine write or delete failed
    #[error("Search engine error: {0}")]
    Engine(#[from] SearchError),

    /// `start_bulk` called while a bulk session is open
    #[error("A bulk indexing session is already active")]
    BulkSessionActive,

    /// Some buffered types failed to flush; flushed types stay committed
    #[error("Bulk flush failed for types [{}] ({} flushed): {first_error}", .failed_types.join(", "), .flushed_types.len())]
    BulkIndexPartialFailure {
        failed_types: Vec<String>,
        flushed_types: Vec<String>,
        first_error: String,
    },

    /// Records could not be loaded
    #[error("Record source error: {0}")]
    Source(String),

    /// JSON encoding/decoding errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Type or configuration problem
    #[error("Type error: {0}")]
    Types(#[from] SiftError),

    /// Buffer mutex poisoned
    #[error("Bulk buffer locked: {0}")]
    BufferLocked(String),

    /// File read failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for IndexingError {
    fn from(err: serde_json::Error) -> Self {
        IndexingError::Serialization(err.to_string())
    }
}
