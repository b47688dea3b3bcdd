//! Staged reindex: every registered type, once per stage snapshot.

use std::time::Instant;

use sift_types::{Document, FieldRegistry, Stage};
use tracing::{info, warn};

use crate::error::IndexingError;
use crate::indexer::DocumentIndexer;
use crate::source::RecordSource;

/// Configuration for staged reindex runs.
#[derive(Debug, Clone)]
pub struct ReindexConfig {
    /// Documents per engine write.
    pub batch_size: usize,
    /// Types to reindex; empty means every registered type.
    pub types: Vec<String>,
    /// Whether to continue past failing records and snapshots.
    pub continue_on_error: bool,
}

impl Default for ReindexConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            types: Vec::new(),
            continue_on_error: true,
        }
    }
}

impl ReindexConfig {
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_types(mut self, types: Vec<String>) -> Self {
        self.types = types;
        self
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }
}

/// Running totals of a reindex.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReindexProgress {
    /// Records seen.
    pub total_processed: u64,
    pub indexed: u64,
    /// Records hidden from search, removed instead.
    pub removed: u64,
    pub errors: u64,
    /// Supporting types are indexed through their owners.
    pub skipped_types: Vec<String>,
    pub completed: bool,
}

/// Outcome of [`reindex_staged`].
#[derive(Debug, Clone)]
pub struct ReindexReport {
    pub progress: ReindexProgress,
    /// Documents written per type and stage.
    pub stages: Vec<(String, Stage, u64)>,
    pub elapsed_ms: u64,
}

impl ReindexReport {
    pub fn failures(&self) -> u64 {
        self.progress.errors
    }
}

/// Receives progress after each written batch and at the end.
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, progress: &ReindexProgress);
}

pub struct NoOpProgressCallback;

impl ProgressCallback for NoOpProgressCallback {
    fn on_progress(&self, _progress: &ReindexProgress) {}
}

/// Logs progress at info level.
pub struct LoggingProgressCallback;

impl ProgressCallback for LoggingProgressCallback {
    fn on_progress(&self, progress: &ReindexProgress) {
        info!(
            total = progress.total_processed,
            indexed = progress.indexed,
            removed = progress.removed,
            errors = progress.errors,
            completed = progress.completed,
            "Reindex progress"
        );
    }
}

/// Stages a type is indexed under.
fn stages_for(versioned: bool) -> &'static [Stage] {
    if versioned {
        &[Stage::Draft, Stage::Live]
    } else {
        &[Stage::Unversioned]
    }
}

/// Reindex registered types from their stage snapshots.
///
/// Versioned types are indexed once from the draft snapshot and once from
/// the live snapshot; unversioned types once. Each stage is independent. A
/// failing record is logged with its identity and counted, and the run
/// continues unless `continue_on_error` is off.
pub async fn reindex_staged<P: ProgressCallback>(
    indexer: &DocumentIndexer,
    source: &dyn RecordSource,
    registry: &FieldRegistry,
    config: &ReindexConfig,
    progress_callback: &P,
) -> Result<ReindexReport, IndexingError> {
    let start = Instant::now();
    let mut progress = ReindexProgress::default();
    let mut stages = Vec::new();

    let type_names: Vec<String> = if config.types.is_empty() {
        registry.type_names().map(String::from).collect()
    } else {
        config.types.clone()
    };
    info!(types = type_names.len(), "Starting staged reindex");

    for type_name in type_names {
        let Some(provider) = registry.get(&type_name) else {
            warn!(type_name = %type_name, "Skipping unregistered type");
            progress.skipped_types.push(type_name);
            continue;
        };
        if provider.is_supporting() {
            info!(type_name = %type_name, "Skipping supporting type");
            progress.skipped_types.push(type_name);
            continue;
        }

        for &stage in stages_for(provider.is_versioned()) {
            let written = reindex_stage(
                indexer,
                source,
                &type_name,
                stage,
                config,
                &mut progress,
                progress_callback,
            )
            .await?;
            info!(type_name = %type_name, stage = %stage, written, "Reindexed stage");
            stages.push((type_name.clone(), stage, written));
        }
    }

    progress.completed = true;
    progress_callback.on_progress(&progress);
    let elapsed_ms = start.elapsed().as_millis() as u64;
    info!(
        indexed = progress.indexed,
        removed = progress.removed,
        errors = progress.errors,
        elapsed_ms,
        "Staged reindex complete"
    );

    Ok(ReindexReport {
        progress,
        stages,
        elapsed_ms,
    })
}

async fn reindex_stage<P: ProgressCallback>(
    indexer: &DocumentIndexer,
    source: &dyn RecordSource,
    type_name: &str,
    stage: Stage,
    config: &ReindexConfig,
    progress: &mut ReindexProgress,
    progress_callback: &P,
) -> Result<u64, IndexingError> {
    let records = match source.records(type_name, stage).await {
        Ok(records) => records,
        Err(e) if config.continue_on_error => {
            warn!(type_name, stage = %stage, error = %e, "Failed to load stage snapshot");
            progress.errors += 1;
            return Ok(0);
        }
        Err(e) => return Err(e),
    };

    let mut written = 0;
    let mut batch: Vec<Document> = Vec::with_capacity(config.batch_size);
    for record in records {
        progress.total_processed += 1;
        if !record.show_in_search() {
            match indexer.remove(record.as_ref(), stage).await {
                Ok(_) => progress.removed += 1,
                Err(e) if config.continue_on_error => {
                    warn!(type_name, record_id = record.record_id(), stage = %stage, error = %e, "Failed to remove hidden record");
                    progress.errors += 1;
                }
                Err(e) => return Err(e),
            }
            continue;
        }
        batch.push(indexer.document_for(record.as_ref(), stage));
        if batch.len() >= config.batch_size {
            written += flush(indexer, type_name, &mut batch, config, progress).await?;
            progress_callback.on_progress(progress);
        }
    }
    if !batch.is_empty() {
        written += flush(indexer, type_name, &mut batch, config, progress).await?;
        progress_callback.on_progress(progress);
    }
    Ok(written)
}

/// Write a batch. A rejected batch is retried one document at a time so a
/// single bad record only fails itself.
async fn flush(
    indexer: &DocumentIndexer,
    type_name: &str,
    batch: &mut Vec<Document>,
    config: &ReindexConfig,
    progress: &mut ReindexProgress,
) -> Result<u64, IndexingError> {
    let documents = std::mem::take(batch);
    match indexer.write(type_name, &documents).await {
        Ok(_) => {
            progress.indexed += documents.len() as u64;
            return Ok(documents.len() as u64);
        }
        Err(e) if !config.continue_on_error => return Err(e),
        Err(e) if documents.len() > 1 => {
            warn!(type_name, count = documents.len(), error = %e, "Batch rejected, retrying per document");
        }
        Err(_) => {}
    }

    let mut written = 0;
    for document in documents {
        match indexer.write(type_name, std::slice::from_ref(&document)).await {
            Ok(_) => {
                progress.indexed += 1;
                written += 1;
            }
            Err(e) => {
                warn!(
                    type_name,
                    record_id = document.record_id,
                    stage = %document.stage,
                    error = %e,
                    "Failed to reindex record"
                );
                progress.errors += 1;
            }
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::record::Record;
    use crate::source::MemoryRecordSource;
    use crate::testing::RecordingEngine;
    use sift_types::{FieldType, TypeDefinition};

    #[derive(Default)]
    struct CollectingCallback {
        seen: Mutex<Vec<ReindexProgress>>,
    }

    impl ProgressCallback for CollectingCallback {
        fn on_progress(&self, progress: &ReindexProgress) {
            self.seen.lock().unwrap().push(progress.clone());
        }
    }

    fn registry() -> FieldRegistry {
        let mut helper = TypeDefinition::new("Attachment");
        helper.supporting = true;
        FieldRegistry::from_definitions(&[
            TypeDefinition::new("Article").with_field("Title", FieldType::Text),
            TypeDefinition::new("File").unversioned(),
            helper,
        ])
    }

    fn source() -> MemoryRecordSource {
        MemoryRecordSource::from_records(vec![
            Record::new("Article", 1).with_field("Title", "one").published(),
            Record::new("Article", 2).with_field("Title", "two"),
            Record::new("Article", 3).hidden(),
            Record::new("File", 4).unversioned(),
            Record::new("Attachment", 5),
        ])
    }

    #[tokio::test]
    async fn test_reindex_each_stage_of_versioned_types() {
        let engine = Arc::new(RecordingEngine::default());
        let indexer = DocumentIndexer::new(engine.clone());
        let callback = CollectingCallback::default();

        let report = reindex_staged(
            &indexer,
            &source(),
            &registry(),
            &ReindexConfig::default(),
            &callback,
        )
        .await
        .unwrap();

        assert_eq!(
            report.stages,
            vec![
                ("Article".to_string(), Stage::Draft, 2),
                ("Article".to_string(), Stage::Live, 1),
                ("File".to_string(), Stage::Unversioned, 1),
            ]
        );
        assert_eq!(report.progress.indexed, 4);
        assert_eq!(report.progress.removed, 1);
        assert_eq!(report.progress.skipped_types, vec!["Attachment"]);
        assert_eq!(report.failures(), 0);
        assert_eq!(engine.deleted(), vec!["Article_3_Stage"]);

        let seen = callback.seen.lock().unwrap();
        assert!(seen.last().unwrap().completed);
    }

    #[tokio::test]
    async fn test_failing_record_does_not_abort() {
        let engine = Arc::new(RecordingEngine::default());
        let indexer = DocumentIndexer::new(engine.clone());
        let source = MemoryRecordSource::from_records(vec![
            Record::new("Article", 1),
            Record::new("Article", 2).with_field("FailMe", "x"),
            Record::new("Article", 3),
        ]);
        let registry = FieldRegistry::from_definitions(&[TypeDefinition::new("Article")]);

        let report = reindex_staged(
            &indexer,
            &source,
            &registry,
            &ReindexConfig::default(),
            &NoOpProgressCallback,
        )
        .await
        .unwrap();

        assert_eq!(report.failures(), 1);
        assert_eq!(report.progress.indexed, 2);
        let ids: Vec<String> = engine.documents().iter().map(|d| d.id.to_string()).collect();
        assert_eq!(ids, vec!["Article_1_Stage", "Article_3_Stage"]);
    }

    #[tokio::test]
    async fn test_stop_on_error_when_configured() {
        let engine = Arc::new(RecordingEngine::failing_on(["Article"]));
        let indexer = DocumentIndexer::new(engine);
        let registry = FieldRegistry::from_definitions(&[TypeDefinition::new("Article")]);
        let source = MemoryRecordSource::from_records(vec![Record::new("Article", 1)]);

        let result = reindex_staged(
            &indexer,
            &source,
            &registry,
            &ReindexConfig::default().with_continue_on_error(false),
            &NoOpProgressCallback,
        )
        .await;
        assert!(matches!(result, Err(IndexingError::Engine(_))));
    }

    #[tokio::test]
    async fn test_batches_follow_batch_size() {
        let engine = Arc::new(RecordingEngine::default());
        let indexer = DocumentIndexer::new(engine.clone());
        let registry = FieldRegistry::from_definitions(&[TypeDefinition::new("File").unversioned()]);
        let records = (1..=5).map(|id| Record::new("File", id).unversioned()).collect();
        let source = MemoryRecordSource::from_records(records);

        reindex_staged(
            &indexer,
            &source,
            &registry,
            &ReindexConfig::default().with_batch_size(2),
            &NoOpProgressCallback,
        )
        .await
        .unwrap();

        let sizes: Vec<usize> = engine.batches().iter().map(|(_, ids)| ids.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }
}
