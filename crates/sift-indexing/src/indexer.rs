//! Single-document writes, the bulk buffer and publish hooks.
//!
//! The bulk buffer is a single-writer resource: one bulk session per
//! indexer. Plain `index`/`remove` calls outside a session are independent
//! writes and may run concurrently.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use sift_search::SearchEngine;
use sift_types::{common_mapping, Document, DocumentId, FieldRegistry, Stage};
use tracing::{debug, error, info, warn};

use crate::error::IndexingError;
use crate::record::SearchableRecord;

/// What `index` did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexAction {
    /// Written to the engine
    Indexed,
    /// Held in the bulk buffer until `end_bulk`
    Buffered,
    /// Hidden from search, existing document removed
    Removed,
}

/// Documents written per type by `end_bulk`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkFlushReport {
    pub flushed: Vec<(String, usize)>,
}

impl BulkFlushReport {
    pub fn total(&self) -> usize {
        self.flushed.iter().map(|(_, n)| n).sum()
    }
}

type BulkBuffer = BTreeMap<String, Vec<Document>>;

pub struct DocumentIndexer {
    engine: Arc<dyn SearchEngine>,
    registry: Option<FieldRegistry>,
    /// `Some` while a bulk session is open
    buffer: Mutex<Option<BulkBuffer>>,
}

impl DocumentIndexer {
    pub fn new(engine: Arc<dyn SearchEngine>) -> Self {
        Self {
            engine,
            registry: None,
            buffer: Mutex::new(None),
        }
    }

    /// Restrict indexed fields to the registered types' mappings.
    pub fn with_registry(mut self, registry: FieldRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn engine(&self) -> &Arc<dyn SearchEngine> {
        &self.engine
    }

    /// Stage a record is written under. Unversioned content has one document.
    pub fn effective_stage(&self, record: &dyn SearchableRecord, requested: Stage) -> Stage {
        let type_versioned = self
            .registry
            .as_ref()
            .and_then(|r| r.get(record.type_name()))
            .is_none_or(|p| p.is_versioned());
        if !record.is_versioned() || !type_versioned {
            return Stage::Unversioned;
        }
        if requested == Stage::Unversioned {
            warn!(
                type_name = record.type_name(),
                record_id = record.record_id(),
                "Versioned record indexed without a stage, using live"
            );
            return Stage::Live;
        }
        requested
    }

    pub fn document_id(&self, record: &dyn SearchableRecord, stage: Stage) -> DocumentId {
        DocumentId::new(
            record.type_name(),
            record.record_id(),
            self.effective_stage(record, stage),
        )
    }

    /// Engine document for a record in a stage.
    ///
    /// With a registry, only fields of the record's type and the common
    /// fields are kept; unregistered types keep every field.
    pub fn document_for(&self, record: &dyn SearchableRecord, stage: Stage) -> Document {
        let stage = self.effective_stage(record, stage);
        let mut document = Document::new(record.type_name(), record.record_id(), stage)
            .with_type_hierarchy(record.type_hierarchy())
            .with_parents(record.parents_hierarchy())
            .with_public_view(record.public_view())
            .with_last_edited(record.last_edited());

        let allowed = self
            .registry
            .as_ref()
            .and_then(|r| r.get(record.type_name()))
            .map(|p| {
                let mut fields = p.selectable_fields();
                fields.extend(common_mapping());
                fields
            });
        for (name, value) in record.fields() {
            match &allowed {
                Some(allowed) if !allowed.contains_key(&name) => {
                    debug!(type_name = record.type_name(), field = %name, "Skipping unmapped field");
                }
                _ => {
                    document.fields.insert(name, value);
                }
            }
        }
        document
    }

    /// Write a record, or buffer it while a bulk session is open.
    ///
    /// Records hidden from search are removed instead.
    pub async fn index(
        &self,
        record: &dyn SearchableRecord,
        stage: Stage,
    ) -> Result<IndexAction, IndexingError> {
        if !record.show_in_search() {
            self.remove(record, stage).await?;
            return Ok(IndexAction::Removed);
        }

        let document = self.document_for(record, stage);
        if self.buffer_document(&document)? {
            debug!(id = %document.id, "Buffered document");
            return Ok(IndexAction::Buffered);
        }

        self.write(&document.type_name, std::slice::from_ref(&document))
            .await
            .inspect_err(|e| {
                error!(
                    type_name = %document.type_name,
                    record_id = document.record_id,
                    stage = %document.stage,
                    error = %e,
                    "Failed to index document"
                );
            })?;
        Ok(IndexAction::Indexed)
    }

    /// Delete the document of a record in a stage. Returns whether it existed.
    pub async fn remove(
        &self,
        record: &dyn SearchableRecord,
        stage: Stage,
    ) -> Result<bool, IndexingError> {
        let id = self.document_id(record, stage);
        self.remove_id(&id).await
    }

    pub async fn remove_id(&self, id: &DocumentId) -> Result<bool, IndexingError> {
        let deleted = self
            .engine
            .delete_documents(std::slice::from_ref(id))
            .await
            .inspect_err(|e| {
                error!(
                    type_name = id.type_name(),
                    record_id = id.record_id(),
                    stage = %id.stage(),
                    error = %e,
                    "Failed to remove document"
                );
            })?;
        debug!(id = %id, deleted, "Removed document");
        Ok(deleted > 0)
    }

    /// The record was published: index its live version.
    pub async fn on_publish(&self, record: &dyn SearchableRecord) -> Result<IndexAction, IndexingError> {
        self.index(record, Stage::Live).await
    }

    /// The record was unpublished: remove its live version.
    pub async fn on_unpublish(&self, record: &dyn SearchableRecord) -> Result<bool, IndexingError> {
        self.remove(record, Stage::Live).await
    }

    /// Write documents of one type as a single batch.
    pub async fn write(&self, type_name: &str, documents: &[Document]) -> Result<usize, IndexingError> {
        Ok(self.engine.index_documents(type_name, documents).await?)
    }

    pub fn is_bulk_active(&self) -> Result<bool, IndexingError> {
        Ok(self.lock_buffer()?.is_some())
    }

    /// Open a bulk session. Writes are buffered per type until `end_bulk`.
    pub fn start_bulk(&self) -> Result<(), IndexingError> {
        let mut buffer = self.lock_buffer()?;
        if buffer.is_some() {
            return Err(IndexingError::BulkSessionActive);
        }
        *buffer = Some(BulkBuffer::new());
        debug!("Started bulk indexing session");
        Ok(())
    }

    /// Close the bulk session and write one batch per buffered type.
    ///
    /// A failing type does not stop the remaining types; the failure is
    /// reported after all types were attempted. Flushed types stay written.
    /// Without an open session this is a no-op.
    pub async fn end_bulk(&self) -> Result<BulkFlushReport, IndexingError> {
        let taken = self.lock_buffer()?.take();
        let Some(buffer) = taken else {
            return Ok(BulkFlushReport::default());
        };

        let mut report = BulkFlushReport::default();
        let mut failed_types = Vec::new();
        let mut first_error = None;
        for (type_name, documents) in buffer {
            match self.write(&type_name, &documents).await {
                Ok(count) => {
                    info!(type_name = %type_name, count, "Flushed bulk batch");
                    report.flushed.push((type_name, count));
                }
                Err(e) => {
                    let ids: Vec<String> = documents.iter().map(|d| d.id.to_string()).collect();
                    error!(
                        type_name = %type_name,
                        count = documents.len(),
                        ids = ?ids,
                        error = %e,
                        "Failed to flush bulk batch"
                    );
                    first_error.get_or_insert_with(|| e.to_string());
                    failed_types.push(type_name);
                }
            }
        }

        if failed_types.is_empty() {
            Ok(report)
        } else {
            Err(IndexingError::BulkIndexPartialFailure {
                failed_types,
                flushed_types: report.flushed.into_iter().map(|(t, _)| t).collect(),
                first_error: first_error.unwrap_or_default(),
            })
        }
    }

    /// Buffer a document if a session is open. A re-indexed identity
    /// replaces its earlier buffered version.
    fn buffer_document(&self, document: &Document) -> Result<bool, IndexingError> {
        let mut guard = self.lock_buffer()?;
        let Some(buffer) = guard.as_mut() else {
            return Ok(false);
        };
        let batch = buffer.entry(document.type_name.clone()).or_default();
        match batch.iter_mut().find(|d| d.id == document.id) {
            Some(existing) => *existing = document.clone(),
            None => batch.push(document.clone()),
        }
        Ok(true)
    }

    fn lock_buffer(&self) -> Result<std::sync::MutexGuard<'_, Option<BulkBuffer>>, IndexingError> {
        self.buffer
            .lock()
            .map_err(|e| IndexingError::BufferLocked(e.to_string()))
    }
}
