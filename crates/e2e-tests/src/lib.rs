//! End-to-end test infrastructure for sift.
//!
//! Provides a shared [`TestHarness`] and record helpers for tests covering
//! the full index-to-search pipeline against an on-disk tantivy index.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use sift_indexing::{DocumentIndexer, Record};
use sift_query::SearchQuery;
use sift_search::{
    FacetGroup, PaginatedResult, RawSearchResponse, RequestParams, SearchEngine, SearchError,
    SearchExecutor, SearchFailed, SearchIndexConfig, SearchProfile, SelectedFacet, TantivyEngine,
};
use sift_types::{Document, DocumentId, FieldMapping, FieldRegistry, FieldType, Stage, TypeDefinition};

/// Content types used across the e2e suite.
///
/// `NewsArticle` is a subtype of `Article`, `Page` forms a tree and `File`
/// is unversioned.
pub fn test_registry() -> FieldRegistry {
    let article = |name: &str| {
        TypeDefinition::new(name)
            .with_field("Title", FieldType::Text)
            .with_field("Content", FieldType::Text)
            .with_field("Category", FieldType::Keyword)
    };
    FieldRegistry::from_definitions(&[
        article("Article"),
        article("NewsArticle"),
        TypeDefinition::new("Page")
            .with_field("Title", FieldType::Text)
            .with_field("Content", FieldType::Text)
            .as_tree(),
        TypeDefinition::new("File")
            .with_field("Title", FieldType::Text)
            .unversioned(),
    ])
}

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub index_path: PathBuf,
    pub registry: FieldRegistry,
    pub engine: Arc<TantivyEngine>,
    pub indexer: DocumentIndexer,
}

impl TestHarness {
    /// Create a harness with an empty index in a temp directory.
    pub fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let index_path = temp_dir.path().join("index");
        std::fs::create_dir_all(&index_path).expect("Failed to create index dir");

        let registry = test_registry();
        let engine = Arc::new(
            TantivyEngine::open(SearchIndexConfig::new(index_path.clone()), &registry.mapping())
                .expect("Failed to open test index"),
        );
        let indexer = DocumentIndexer::new(engine.clone()).with_registry(registry.clone());

        Self {
            _temp_dir: temp_dir,
            index_path,
            registry,
            engine,
            indexer,
        }
    }

    pub fn engine(&self) -> Arc<dyn SearchEngine> {
        self.engine.clone()
    }

    /// Index records into every stage they exist in. Returns documents written.
    pub async fn index_records(&self, mut records: Vec<Record>) -> usize {
        Record::resolve_parents(&mut records);
        let mut written = 0;
        for record in &records {
            for stage in record.stages() {
                self.indexer
                    .index(record, stage)
                    .await
                    .expect("Failed to index record");
                written += 1;
            }
        }
        written
    }

    /// Run one search request through a profile, the way a search page does.
    pub async fn search(
        &self,
        profile: &SearchProfile,
        query_string: &str,
        stage: Stage,
    ) -> Result<SearchPage, SearchFailed> {
        let params = RequestParams::parse(query_string);
        let request = profile.request(&params, &self.registry, stage);
        let result = SearchExecutor::new(self.engine())
            .execute(&request.builder.compile(), request.offset, request.limit)
            .await?;

        let aggregator = profile.facet_aggregator();
        Ok(SearchPage {
            facets: aggregator.aggregate(&result.aggregations, &params),
            selected: aggregator.selected(&params),
            result,
        })
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Results and facets of one search request.
#[derive(Debug)]
pub struct SearchPage {
    pub result: PaginatedResult,
    pub facets: Vec<FacetGroup>,
    pub selected: Vec<SelectedFacet>,
}

impl SearchPage {
    /// Engine ids of the page's items, in rank order.
    pub fn ids(&self) -> Vec<String> {
        self.result.items.iter().map(|hit| hit.id.clone()).collect()
    }

    /// `(key, count)` pairs of a facet, in engine order.
    pub fn buckets(&self, field: &str) -> Vec<(String, u64)> {
        self.facets
            .iter()
            .find(|group| group.field == field)
            .map(|group| {
                group
                    .buckets
                    .iter()
                    .map(|b| (b.key.clone(), b.count))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Engine id string for a record in a stage.
pub fn doc_id(type_name: &str, record_id: u64, stage: Stage) -> String {
    DocumentId::new(type_name, record_id, stage).to_string()
}

/// A published article.
pub fn article(id: u64, title: &str, content: &str, category: &str) -> Record {
    Record::new("Article", id)
        .with_field("Title", title)
        .with_field("Content", content)
        .with_field("Category", category)
        .published()
}

/// A published page, optionally below another page.
pub fn page(id: u64, title: &str, parent: Option<u64>) -> Record {
    let record = Record::new("Page", id)
        .with_field("Title", title)
        .with_field("Content", format!("{title} page body"))
        .published();
    match parent {
        Some(parent) => record.with_parent(parent),
        None => record,
    }
}

/// Live documents last edited at `at`.
pub fn stale_documents(
    type_name: &str,
    ids: std::ops::RangeInclusive<u64>,
    at: DateTime<Utc>,
) -> Vec<Document> {
    ids.map(|id| {
        Document::new(type_name, id, Stage::Live)
            .with_field("Title", format!("{type_name} {id}"))
            .with_last_edited(at)
    })
    .collect()
}

/// Engine wrapper rejecting writes of some types.
pub struct RejectingEngine {
    inner: Arc<dyn SearchEngine>,
    rejected: BTreeSet<String>,
}

impl RejectingEngine {
    pub fn new<'a>(inner: Arc<dyn SearchEngine>, rejected: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            inner,
            rejected: rejected.into_iter().map(String::from).collect(),
        }
    }
}

#[async_trait]
impl SearchEngine for RejectingEngine {
    async fn search(
        &self,
        query: &SearchQuery,
        offset: usize,
        limit: usize,
    ) -> Result<RawSearchResponse, SearchError> {
        self.inner.search(query, offset, limit).await
    }

    async fn index_documents(
        &self,
        type_name: &str,
        documents: &[Document],
    ) -> Result<usize, SearchError> {
        if self.rejected.contains(type_name) {
            return Err(SearchError::Engine {
                status: 400,
                message: format!("mapper_parsing_exception for {type_name}"),
            });
        }
        self.inner.index_documents(type_name, documents).await
    }

    async fn delete_documents(&self, ids: &[DocumentId]) -> Result<usize, SearchError> {
        self.inner.delete_documents(ids).await
    }

    async fn refresh(&self) -> Result<(), SearchError> {
        self.inner.refresh().await
    }

    async fn ensure_mapping(&self, mapping: &FieldMapping) -> Result<(), SearchError> {
        self.inner.ensure_mapping(mapping).await
    }
}
