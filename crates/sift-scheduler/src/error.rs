//! Error types for the scheduler crate.

use sift_search::SearchError;
use thiserror::Error;

/// Errors that can occur during scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Scheduler is already running
    #[error("Scheduler is already running")]
    AlreadyRunning,

    /// Scheduler is not running
    #[error("Scheduler is not running")]
    NotRunning,

    /// Engine error while pruning a batch; the run is marked failed
    #[error("Prune batch failed: {0}")]
    PruneBatch(#[source] SearchError),

    /// Job failed for another reason
    #[error("Job failed: {0}")]
    Job(String),

    /// Queue mutex poisoned
    #[error("Job queue locked: {0}")]
    QueueLocked(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchedulerError::QueueLocked("poisoned".to_string());
        assert_eq!(err.to_string(), "Job queue locked: poisoned");

        let err = SchedulerError::AlreadyRunning;
        assert!(err.to_string().contains("already running"));

        let err = SchedulerError::NotRunning;
        assert!(err.to_string().contains("not running"));

        let err = SchedulerError::PruneBatch(SearchError::Timeout(500));
        assert!(err.to_string().starts_with("Prune batch failed"));
    }
}
