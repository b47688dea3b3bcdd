//! Search execution with pagination.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{Map, Value};
use sift_query::SearchQuery;
use sift_types::DocumentId;
use tracing::{debug, error};

use crate::engine::{RawAggregation, RawHit, SearchEngine};
use crate::error::{SearchError, SearchFailed};

/// One result item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Engine identity as returned
    pub id: String,
    pub score: Option<f32>,
    pub source: Map<String, Value>,
    pub highlights: BTreeMap<String, Vec<String>>,
}

impl SearchHit {
    /// Parsed identity; `None` for documents not written by sift.
    pub fn document_id(&self) -> Option<DocumentId> {
        self.id.parse().ok()
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.source.get(name)
    }

    /// String value of a source field.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(Value::as_str)
    }
}

impl From<RawHit> for SearchHit {
    fn from(hit: RawHit) -> Self {
        Self {
            id: hit.id,
            score: hit.score,
            source: hit.source,
            highlights: hit.highlights,
        }
    }
}

/// One page of results plus the facet buckets of the whole result set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaginatedResult {
    /// At most `limit` items
    pub items: Vec<SearchHit>,
    /// Engine-reported total; at least `items.len()`
    pub total_count: u64,
    pub offset: usize,
    pub limit: usize,
    pub elapsed_ms: f64,
    #[serde(skip)]
    pub aggregations: Vec<RawAggregation>,
}

impl PaginatedResult {
    pub fn is_empty(&self) -> bool {
        self.total_count == 0
    }

    /// One-based page number of this result.
    pub fn current_page(&self) -> usize {
        if self.limit == 0 {
            return 1;
        }
        (self.offset / self.limit).saturating_add(1)
    }

    pub fn total_pages(&self) -> usize {
        if self.limit == 0 {
            return 0;
        }
        (self.total_count as usize).div_ceil(self.limit)
    }

    pub fn has_next(&self) -> bool {
        self.offset.saturating_add(self.items.len()) < self.total_count as usize
    }

    pub fn has_previous(&self) -> bool {
        self.offset > 0
    }
}

/// Runs compiled queries against an engine.
///
/// Stateless per request; share one executor across concurrent searches.
#[derive(Clone)]
pub struct SearchExecutor {
    engine: Arc<dyn SearchEngine>,
    timeout: Option<Duration>,
}

impl SearchExecutor {
    pub fn new(engine: Arc<dyn SearchEngine>) -> Self {
        Self {
            engine,
            timeout: None,
        }
    }

    /// Fail searches that take longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn engine(&self) -> &Arc<dyn SearchEngine> {
        &self.engine
    }

    /// Execute `query`, returning items `offset..offset + limit`.
    ///
    /// Engine failures and timeouts are reported as [`SearchFailed`], never
    /// as an empty result.
    pub async fn execute(
        &self,
        query: &SearchQuery,
        offset: usize,
        limit: usize,
    ) -> Result<PaginatedResult, SearchFailed> {
        let started = Instant::now();
        let search = self.engine.search(query, offset, limit);
        let outcome = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, search).await {
                Ok(outcome) => outcome,
                Err(_) => Err(SearchError::Timeout(timeout.as_millis() as u64)),
            },
            None => search.await,
        };

        let raw = outcome.map_err(|e| {
            error!(error = %e, offset, limit, "Search failed");
            SearchFailed::from(e)
        })?;

        let mut items: Vec<SearchHit> = raw.hits.into_iter().map(SearchHit::from).collect();
        items.truncate(limit);
        let total_count = raw.total_hits.max(items.len() as u64);
        let elapsed_ms = match raw.took_ms {
            Some(took) => took as f64,
            None => started.elapsed().as_secs_f64() * 1000.0,
        };

        debug!(total_count, returned = items.len(), elapsed_ms, "Search executed");

        Ok(PaginatedResult {
            items,
            total_count,
            offset,
            limit,
            elapsed_ms,
            aggregations: raw.aggregations,
        })
    }
}
