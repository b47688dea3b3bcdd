//! Search error types.

use thiserror::Error;

/// Errors raised by search engines and their backends.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Tantivy index error
    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    /// Query parse error
    #[error("Query parse error: {0}")]
    QueryParse(#[from] tantivy::query::QueryParserError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The engine answered with an error status
    #[error("Engine returned {status}: {message}")]
    Engine { status: u16, message: String },

    /// The engine response did not have the expected shape
    #[error("Malformed engine response: {0}")]
    MalformedResponse(String),

    /// Request exceeded its deadline
    #[error("Search timed out after {0}ms")]
    Timeout(u64),

    /// Some documents of a batch were rejected
    #[error("Bulk request rejected {failed} of {total} documents: {first_error}")]
    BulkRejected {
        failed: usize,
        total: usize,
        first_error: String,
    },

    /// Schema mismatch
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Index is locked (another process has it open)
    #[error("Index is locked: {0}")]
    IndexLocked(String),

    /// Blocking task failed to complete
    #[error("Search task failed: {0}")]
    Task(String),
}

/// A search could not be completed.
///
/// Callers show a generic message; the underlying engine error is kept for
/// logs and diagnostics.
#[derive(Debug, Error)]
#[error("Search failed: {source}")]
pub struct SearchFailed {
    #[from]
    pub source: SearchError,
}

impl SearchFailed {
    /// Message safe to show to end users.
    pub fn user_message(&self) -> &'static str {
        "Search failed"
    }
}
