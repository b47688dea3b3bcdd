//! Write side of sift: turning records into engine documents.
//!
//! ## Key Components
//!
//! - [`SearchableRecord`]: content that can be indexed; [`Record`] is the JSON form
//! - [`DocumentIndexer`]: single writes, the per-type bulk buffer and
//!   publish/unpublish hooks
//! - [`RecordSource`]: stage snapshots of records
//! - [`reindex_staged`]: rebuild every registered type per stage with progress
//!   reporting
//!
//! ## Example
//!
//! ```ignore
//! let indexer = DocumentIndexer::new(engine).with_registry(registry);
//! indexer.start_bulk()?;
//! for record in &records {
//!     indexer.index(record, Stage::Draft).await?;
//! }
//! let report = indexer.end_bulk().await?;
//! ```

pub mod error;
pub mod indexer;
pub mod record;
pub mod reindex;
pub mod source;

#[cfg(test)]
mod testing;

pub use error::IndexingError;
pub use indexer::{BulkFlushReport, DocumentIndexer, IndexAction};
pub use record::{walk_parents, Record, SearchableRecord};
pub use reindex::{
    reindex_staged, LoggingProgressCallback, NoOpProgressCallback, ProgressCallback,
    ReindexConfig, ReindexProgress, ReindexReport,
};
pub use source::{MemoryRecordSource, RecordSource};
