//! Embedded search engine backed by a tantivy index.
//!
//! Blocking index work runs on the tokio blocking pool. Writes go through a
//! single shared `IndexWriter`; each batch is one commit, after which the
//! reader is reloaded so the batch is immediately searchable.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use sift_query::SearchQuery;
use sift_types::{Document, DocumentId, FieldMapping, FieldType};
use tantivy::collector::{Count, DocSetCollector, TopDocs};
use tantivy::query::TermQuery;
use tantivy::schema::IndexRecordOption;
use tantivy::snippet::SnippetGenerator;
use tantivy::{DocAddress, IndexReader, IndexWriter, TantivyDocument, Term};
use tracing::{debug, info};

use crate::aggregate::{aggregate, sort_by_clauses};
use crate::document::{stored_id, stored_source, to_tantivy};
use crate::engine::{RawHit, RawSearchResponse, SearchEngine};
use crate::error::SearchError;
use crate::index::{SearchIndex, SearchIndexConfig};
use crate::translate::Translator;

/// A match loaded from the index.
struct Candidate {
    address: DocAddress,
    doc: TantivyDocument,
    hit: RawHit,
}

/// Number of top-scoring documents a search has to load. Aggregations,
/// post filters and field sorts work on every match; plain relevance pages
/// only need the hits up to the end of the page.
fn candidate_window(query: &SearchQuery, offset: usize, limit: usize, matched: usize) -> usize {
    if query.aggregations.is_empty() && query.post_filter.is_none() && query.sort.is_empty() {
        offset.saturating_add(limit).min(matched)
    } else {
        matched
    }
}

struct LocalIndex {
    index: SearchIndex,
    writer: Mutex<IndexWriter>,
    reader: IndexReader,
}

impl LocalIndex {
    fn new(index: SearchIndex) -> Result<Self, SearchError> {
        let writer = index.writer()?;
        let reader = index.reader()?;
        Ok(Self {
            index,
            writer: Mutex::new(writer),
            reader,
        })
    }

    fn search(
        &self,
        query: &SearchQuery,
        offset: usize,
        limit: usize,
    ) -> Result<RawSearchResponse, SearchError> {
        let started = Instant::now();
        let schema = self.index.schema();
        let searcher = self.reader.searcher();
        let translator = Translator::new(self.index.index(), schema);

        let main = translator.translate(&query.query)?;
        let matched = searcher.search(&*main, &Count)?;
        let window = candidate_window(query, offset, limit, matched);
        let top = if window == 0 {
            Vec::new()
        } else {
            searcher.search(&*main, &TopDocs::with_limit(window))?
        };

        let mut candidates = Vec::with_capacity(top.len());
        for (score, address) in top {
            let doc: TantivyDocument = searcher.doc(address)?;
            let hit = RawHit {
                id: stored_id(schema, &doc),
                score: Some(score),
                source: stored_source(schema, &doc),
                highlights: BTreeMap::new(),
            };
            candidates.push(Candidate { address, doc, hit });
        }

        // aggregations see every match; the post filter only narrows the hits
        let aggregations = query
            .aggregations
            .iter()
            .map(|agg| aggregate(&candidates, agg, |c| &c.hit))
            .collect();

        if let Some(post_filter) = &query.post_filter {
            let filter = translator.translate(post_filter)?;
            let allowed = searcher.search(&*filter, &DocSetCollector)?;
            candidates.retain(|c| allowed.contains(&c.address));
        }
        let total_hits = if query.post_filter.is_some() {
            candidates.len() as u64
        } else {
            matched as u64
        };

        sort_by_clauses(&mut candidates, &query.sort, |c| &c.hit);

        let mut generators = Vec::new();
        if let Some(highlight) = &query.highlight {
            for name in &highlight.fields {
                if let Some((field, FieldType::Text)) = schema.field(name) {
                    generators.push((name.clone(), SnippetGenerator::create(&searcher, &*main, field)?));
                }
            }
        }

        let hits = candidates
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|candidate| {
                let mut hit = candidate.hit;
                for (name, generator) in &generators {
                    let snippet = generator.snippet_from_doc(&candidate.doc);
                    if !snippet.is_empty() {
                        hit.highlights.insert(name.clone(), vec![snippet.to_html()]);
                    }
                }
                hit
            })
            .collect::<Vec<_>>();

        let took_ms = started.elapsed().as_millis() as u64;
        debug!(total_hits, returned = hits.len(), took_ms, "Local search complete");

        Ok(RawSearchResponse {
            total_hits,
            took_ms: Some(took_ms),
            hits,
            aggregations,
        })
    }

    fn write(&self, type_name: &str, documents: &[Document]) -> Result<usize, SearchError> {
        let schema = self.index.schema();
        let prepared = documents
            .iter()
            .map(|doc| {
                let key = Term::from_field_text(schema.id_field(), &doc.id.to_string());
                to_tantivy(schema, doc).map(|converted| (key, converted))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut writer = self
            .writer
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))?;
        for (key, doc) in prepared {
            writer.delete_term(key);
            if let Err(e) = writer.add_document(doc) {
                writer.rollback()?;
                return Err(e.into());
            }
        }
        writer.commit()?;
        drop(writer);
        self.reader.reload()?;

        info!(type_name = %type_name, count = documents.len(), "Indexed documents");
        Ok(documents.len())
    }

    fn delete(&self, ids: &[DocumentId]) -> Result<usize, SearchError> {
        let schema = self.index.schema();
        let searcher = self.reader.searcher();
        let mut existing = 0;
        let mut keys = Vec::with_capacity(ids.len());
        for id in ids {
            let key = Term::from_field_text(schema.id_field(), &id.to_string());
            let query = TermQuery::new(key.clone(), IndexRecordOption::Basic);
            if searcher.search(&query, &Count)? > 0 {
                existing += 1;
            }
            keys.push(key);
        }

        let mut writer = self
            .writer
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))?;
        for key in keys {
            writer.delete_term(key);
        }
        writer.commit()?;
        drop(writer);
        self.reader.reload()?;

        info!(requested = ids.len(), deleted = existing, "Deleted documents");
        Ok(existing)
    }
}

/// [`SearchEngine`] over an embedded tantivy index.
#[derive(Clone)]
pub struct TantivyEngine {
    inner: Arc<LocalIndex>,
}

impl TantivyEngine {
    /// Open or create an on-disk index.
    pub fn open(config: SearchIndexConfig, mapping: &FieldMapping) -> Result<Self, SearchError> {
        Self::from_index(SearchIndex::open_or_create(config, mapping)?)
    }

    /// Create an index held in memory.
    pub fn in_memory(mapping: &FieldMapping) -> Result<Self, SearchError> {
        Self::from_index(SearchIndex::in_memory(mapping)?)
    }

    fn from_index(index: SearchIndex) -> Result<Self, SearchError> {
        Ok(Self {
            inner: Arc::new(LocalIndex::new(index)?),
        })
    }

    /// Mapping the index was created with.
    pub fn mapping(&self) -> &FieldMapping {
        self.inner.index.mapping()
    }

    /// Number of live documents in the index.
    pub fn num_docs(&self) -> u64 {
        self.inner.reader.searcher().num_docs()
    }

    async fn blocking<T, F>(&self, task: F) -> Result<T, SearchError>
    where
        T: Send + 'static,
        F: FnOnce(&LocalIndex) -> Result<T, SearchError> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || task(&inner))
            .await
            .map_err(|e| SearchError::Task(e.to_string()))?
    }
}

#[async_trait]
impl SearchEngine for TantivyEngine {
    async fn search(
        &self,
        query: &SearchQuery,
        offset: usize,
        limit: usize,
    ) -> Result<RawSearchResponse, SearchError> {
        let query = query.clone();
        self.blocking(move |local| local.search(&query, offset, limit))
            .await
    }

    async fn index_documents(
        &self,
        type_name: &str,
        documents: &[Document],
    ) -> Result<usize, SearchError> {
        if documents.is_empty() {
            return Ok(0);
        }
        let type_name = type_name.to_string();
        let documents = documents.to_vec();
        self.blocking(move |local| local.write(&type_name, &documents))
            .await
    }

    async fn delete_documents(&self, ids: &[DocumentId]) -> Result<usize, SearchError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids = ids.to_vec();
        self.blocking(move |local| local.delete(&ids)).await
    }

    async fn refresh(&self) -> Result<(), SearchError> {
        self.blocking(|local| Ok(local.reader.reload()?)).await
    }

    async fn ensure_mapping(&self, mapping: &FieldMapping) -> Result<(), SearchError> {
        self.inner.index.schema().check_compatible(mapping)
    }
}
