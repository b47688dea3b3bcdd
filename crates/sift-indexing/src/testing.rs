//! Engine double that records writes.

use std::collections::BTreeSet;
use std::sync::Mutex;

use async_trait::async_trait;
use sift_query::SearchQuery;
use sift_search::{RawSearchResponse, SearchEngine, SearchError};
use sift_types::{Document, DocumentId, FieldMapping};

#[derive(Default)]
pub struct RecordingEngine {
    batches: Mutex<Vec<(String, Vec<Document>)>>,
    deleted: Mutex<Vec<String>>,
    failing_types: BTreeSet<String>,
}

impl RecordingEngine {
    pub fn failing_on<'a>(types: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            failing_types: types.into_iter().map(String::from).collect(),
            ..Default::default()
        }
    }

    /// Type and document ids of each batch write, in call order.
    pub fn batches(&self) -> Vec<(String, Vec<String>)> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .map(|(t, docs)| (t.clone(), docs.iter().map(|d| d.id.to_string()).collect()))
            .collect()
    }

    pub fn documents(&self) -> Vec<Document> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(_, docs)| docs.clone())
            .collect()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchEngine for RecordingEngine {
    async fn search(
        &self,
        _query: &SearchQuery,
        _offset: usize,
        _limit: usize,
    ) -> Result<RawSearchResponse, SearchError> {
        Ok(RawSearchResponse::default())
    }

    async fn index_documents(
        &self,
        type_name: &str,
        documents: &[Document],
    ) -> Result<usize, SearchError> {
        if self.failing_types.contains(type_name)
            || documents.iter().any(|d| d.fields.contains_key("FailMe"))
        {
            return Err(SearchError::Engine {
                status: 500,
                message: format!("{type_name} rejected"),
            });
        }
        self.batches
            .lock()
            .unwrap()
            .push((type_name.to_string(), documents.to_vec()));
        Ok(documents.len())
    }

    async fn delete_documents(&self, ids: &[DocumentId]) -> Result<usize, SearchError> {
        let mut deleted = self.deleted.lock().unwrap();
        deleted.extend(ids.iter().map(|id| id.to_string()));
        Ok(ids.len())
    }

    async fn refresh(&self) -> Result<(), SearchError> {
        Ok(())
    }

    async fn ensure_mapping(&self, _mapping: &FieldMapping) -> Result<(), SearchError> {
        Ok(())
    }
}
