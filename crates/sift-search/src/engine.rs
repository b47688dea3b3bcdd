//! Search engine boundary.
//!
//! The query path hands a compiled [`SearchQuery`] plus pagination to a
//! [`SearchEngine`] and receives a [`RawSearchResponse`]; the write path sends
//! batches of documents and identities to delete.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sift_query::SearchQuery;
use sift_types::{Document, DocumentId, FieldMapping};

use crate::error::SearchError;

/// One hit as returned by an engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawHit {
    /// Engine identity, `{type}_{record}_{stage}`
    pub id: String,
    /// Relevance score; absent when the engine sorted by a field
    pub score: Option<f32>,
    pub source: Map<String, Value>,
    /// Field name to highlighted fragments
    pub highlights: BTreeMap<String, Vec<String>>,
}

impl RawHit {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.source.get(name)
    }
}

/// One bucket of a term aggregation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawBucket {
    pub key: String,
    pub doc_count: u64,
    /// Best score among the bucket's documents (expanded facets only)
    pub max_score: Option<f32>,
    /// Representative documents (expanded facets only)
    pub top_hits: Vec<RawHit>,
}

/// Buckets of one named aggregation, in engine order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawAggregation {
    pub name: String,
    pub buckets: Vec<RawBucket>,
}

/// Engine answer to one search request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSearchResponse {
    /// Total matching documents, independent of pagination
    pub total_hits: u64,
    /// Engine-reported execution time
    pub took_ms: Option<u64>,
    pub hits: Vec<RawHit>,
    /// In the order the aggregations were requested
    pub aggregations: Vec<RawAggregation>,
}

impl RawSearchResponse {
    pub fn aggregation(&self, name: &str) -> Option<&RawAggregation> {
        self.aggregations.iter().find(|a| a.name == name)
    }
}

/// A document search engine.
///
/// Implementations must be safe to share across concurrent requests.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Execute a compiled query, returning hits `offset..offset + limit`.
    async fn search(
        &self,
        query: &SearchQuery,
        offset: usize,
        limit: usize,
    ) -> Result<RawSearchResponse, SearchError>;

    /// Write (insert or replace) a batch of documents of one type.
    ///
    /// Returns the number of documents written.
    async fn index_documents(
        &self,
        type_name: &str,
        documents: &[Document],
    ) -> Result<usize, SearchError>;

    /// Delete documents by identity. Returns the number that existed.
    async fn delete_documents(&self, ids: &[DocumentId]) -> Result<usize, SearchError>;

    /// Make previous writes visible to searches.
    async fn refresh(&self) -> Result<(), SearchError>;

    /// Ensure the engine knows every field of `mapping`.
    async fn ensure_mapping(&self, mapping: &FieldMapping) -> Result<(), SearchError>;
}
