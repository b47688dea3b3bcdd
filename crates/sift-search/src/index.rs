//! Tantivy index management.
//!
//! Handles index creation, opening, and the persisted field mapping.

use std::fs;
use std::path::{Path, PathBuf};

use sift_types::FieldMapping;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy};
use tracing::{debug, info};

use crate::error::SearchError;
use crate::schema::IndexSchema;

/// Default memory budget for IndexWriter (50MB)
const DEFAULT_WRITER_MEMORY_MB: usize = 50;

/// Mapping file written next to the index segments.
const MAPPING_FILE: &str = "sift-mapping.json";

/// Search index configuration
#[derive(Debug, Clone)]
pub struct SearchIndexConfig {
    /// Path to index directory
    pub index_path: PathBuf,
    /// Memory budget for writer in MB
    pub writer_memory_mb: usize,
}

impl SearchIndexConfig {
    pub fn new(index_path: impl Into<PathBuf>) -> Self {
        Self {
            index_path: index_path.into(),
            writer_memory_mb: DEFAULT_WRITER_MEMORY_MB,
        }
    }

    pub fn with_memory_mb(mut self, mb: usize) -> Self {
        self.writer_memory_mb = mb;
        self
    }
}

/// Tantivy index with its schema handles.
pub struct SearchIndex {
    index: Index,
    schema: IndexSchema,
    mapping: FieldMapping,
    writer_memory_mb: usize,
    path: Option<PathBuf>,
}

impl SearchIndex {
    /// Open the index at the configured path, or create it for `mapping`.
    ///
    /// An existing index keeps the mapping it was created with; `mapping`
    /// must be compatible with it.
    pub fn open_or_create(
        config: SearchIndexConfig,
        mapping: &FieldMapping,
    ) -> Result<Self, SearchError> {
        let path = config.index_path.as_path();
        let (index, stored_mapping) = if path.join("meta.json").exists() {
            debug!(path = ?path, "Opening existing index");
            let index = Index::open_in_dir(path)?;
            (index, read_mapping(path)?)
        } else {
            info!(path = ?path, "Creating new index");
            fs::create_dir_all(path)?;
            let schema = IndexSchema::build(mapping);
            let index = Index::create_in_dir(path, schema.schema().clone())?;
            write_mapping(path, mapping)?;
            (index, mapping.clone())
        };

        let schema = IndexSchema::from_schema(index.schema(), &stored_mapping)?;
        schema.check_compatible(mapping)?;

        info!(path = ?path, fields = stored_mapping.len(), "Opened search index");

        Ok(Self {
            index,
            schema,
            mapping: stored_mapping,
            writer_memory_mb: config.writer_memory_mb,
            path: Some(config.index_path),
        })
    }

    /// Create a throwaway index held in memory.
    pub fn in_memory(mapping: &FieldMapping) -> Result<Self, SearchError> {
        let schema = IndexSchema::build(mapping);
        let index = Index::create_in_ram(schema.schema().clone());
        debug!(fields = mapping.len(), "Created in-memory index");
        Ok(Self {
            index,
            schema,
            mapping: mapping.clone(),
            writer_memory_mb: DEFAULT_WRITER_MEMORY_MB,
            path: None,
        })
    }

    pub fn schema(&self) -> &IndexSchema {
        &self.schema
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Mapping the index was created with.
    pub fn mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    /// On-disk location; `None` for in-memory indexes.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Create an IndexWriter with configured memory budget
    pub fn writer(&self) -> Result<IndexWriter, SearchError> {
        let memory_budget = self.writer_memory_mb * 1024 * 1024;
        let writer = self.index.writer(memory_budget)?;
        debug!(memory_mb = self.writer_memory_mb, "Created index writer");
        Ok(writer)
    }

    /// Create an IndexReader that reloads only when asked to.
    pub fn reader(&self) -> Result<IndexReader, SearchError> {
        let reader = self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        debug!("Created index reader");
        Ok(reader)
    }
}

fn read_mapping(path: &Path) -> Result<FieldMapping, SearchError> {
    let file = path.join(MAPPING_FILE);
    if !file.exists() {
        return Err(SearchError::SchemaMismatch(format!(
            "{} has no {MAPPING_FILE}; not a sift index",
            path.display()
        )));
    }
    let text = fs::read_to_string(file)?;
    Ok(serde_json::from_str(&text)?)
}

fn write_mapping(path: &Path, mapping: &FieldMapping) -> Result<(), SearchError> {
    let text = serde_json::to_string_pretty(mapping)?;
    fs::write(path.join(MAPPING_FILE), text)?;
    Ok(())
}
