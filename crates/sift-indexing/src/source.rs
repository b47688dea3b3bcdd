//! Stage snapshots of records for reindexing.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use sift_types::Stage;

use crate::error::IndexingError;
use crate::record::{Record, SearchableRecord};

/// Supplies every record of a type as it exists in one stage.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn records(
        &self,
        type_name: &str,
        stage: Stage,
    ) -> Result<Vec<Arc<dyn SearchableRecord>>, IndexingError>;
}

/// Records held in memory, keyed by type and stage.
#[derive(Default, Clone)]
pub struct MemoryRecordSource {
    snapshots: BTreeMap<(String, Stage), Vec<Arc<dyn SearchableRecord>>>,
}

impl MemoryRecordSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, stage: Stage, record: Arc<dyn SearchableRecord>) {
        self.snapshots
            .entry((record.type_name().to_string(), stage))
            .or_default()
            .push(record);
    }

    /// Place JSON records into their stage snapshots.
    ///
    /// Versioned records go to the draft snapshot, and to the live one when
    /// published. Unversioned records have a single snapshot. Parent chains
    /// are resolved from `parent_id` links within each type.
    pub fn from_records(mut records: Vec<Record>) -> Self {
        Record::resolve_parents(&mut records);

        let mut source = Self::new();
        for record in records {
            let stages = record.stages();
            let record: Arc<dyn SearchableRecord> = Arc::new(record);
            for stage in stages {
                source.insert(stage, record.clone());
            }
        }
        source
    }

    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.snapshots.keys().map(|(t, _)| t.clone()).collect();
        names.dedup();
        names
    }

    pub fn len(&self) -> usize {
        self.snapshots.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[async_trait]
impl RecordSource for MemoryRecordSource {
    async fn records(
        &self,
        type_name: &str,
        stage: Stage,
    ) -> Result<Vec<Arc<dyn SearchableRecord>>, IndexingError> {
        Ok(self
            .snapshots
            .get(&(type_name.to_string(), stage))
            .cloned()
            .unwrap_or_default())
    }
}
