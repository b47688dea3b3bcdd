//! Error types for query construction.
//!
//! Compilation itself never fails; these errors come from parsing user-facing
//! knobs and are recovered by the builder with a logged fallback.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    /// Sort direction outside asc/desc
    #[error("Invalid sort direction: {0}")]
    InvalidSortDirection(String),

    /// Unknown query preset name
    #[error("Invalid query preset: {0}")]
    InvalidPreset(String),
}
