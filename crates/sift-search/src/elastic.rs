//! Elasticsearch engine over HTTP.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sift_query::{SearchQuery, MAX_SCORE_AGG, TOP_HITS_AGG};
use sift_types::{Document, DocumentId, EngineSettings, FieldMapping, FieldType};
use tracing::{debug, error, info};

use crate::engine::{RawAggregation, RawBucket, RawHit, RawSearchResponse, SearchEngine};
use crate::error::SearchError;

/// Storage date format in Elasticsearch pattern syntax.
const ES_DATE_FORMAT: &str = "yyyy-MM-dd HH:mm:ss";

/// Remote engine configuration.
#[derive(Debug, Clone)]
pub struct ElasticConfig {
    /// Base URL, e.g. `http://localhost:9200`
    pub url: String,
    pub index_name: String,
    /// Request timeout
    pub timeout: Duration,
}

impl ElasticConfig {
    pub fn new(url: impl Into<String>, index_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            index_name: index_name.into(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl From<&EngineSettings> for ElasticConfig {
    fn from(settings: &EngineSettings) -> Self {
        Self::new(settings.url.clone(), settings.index_name.clone())
            .with_timeout(Duration::from_millis(settings.timeout_ms))
    }
}

/// [`SearchEngine`] talking to an Elasticsearch cluster.
pub struct ElasticEngine {
    client: Client,
    config: ElasticConfig,
}

impl ElasticEngine {
    pub fn new(config: ElasticConfig) -> Result<Self, SearchError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn index_url(&self, suffix: &str) -> String {
        format!(
            "{}/{}{}",
            self.config.url.trim_end_matches('/'),
            self.config.index_name,
            suffix
        )
    }

    fn bulk_url(&self) -> String {
        format!("{}/_bulk", self.config.url.trim_end_matches('/'))
    }

    fn transport_error(&self, e: reqwest::Error) -> SearchError {
        if e.is_timeout() {
            SearchError::Timeout(self.config.timeout.as_millis() as u64)
        } else {
            SearchError::Http(e)
        }
    }

    /// Pass successful responses through; turn error statuses into errors
    /// carrying the engine body.
    async fn check(&self, response: Response) -> Result<Response, SearchError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        error!(status = status.as_u16(), body = %message, "Engine rejected request");
        Err(SearchError::Engine {
            status: status.as_u16(),
            message,
        })
    }

    async fn send_bulk(&self, body: String) -> Result<BulkResponse, SearchError> {
        let response = self
            .client
            .post(self.bulk_url())
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = self.check(response).await?;
        let text = response.text().await.map_err(|e| self.transport_error(e))?;
        serde_json::from_str(&text).map_err(|e| SearchError::MalformedResponse(e.to_string()))
    }
}

#[async_trait]
impl SearchEngine for ElasticEngine {
    async fn search(
        &self,
        query: &SearchQuery,
        offset: usize,
        limit: usize,
    ) -> Result<RawSearchResponse, SearchError> {
        let body = query.to_request_body(offset, limit);
        debug!(body = %body, "Sending search request");

        let response = self
            .client
            .post(self.index_url("/_search"))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = self.check(response).await?;
        let text = response.text().await.map_err(|e| self.transport_error(e))?;
        let parsed: SearchResponse = serde_json::from_str(&text)
            .map_err(|e| SearchError::MalformedResponse(e.to_string()))?;

        parsed.into_raw(query)
    }

    async fn index_documents(
        &self,
        type_name: &str,
        documents: &[Document],
    ) -> Result<usize, SearchError> {
        if documents.is_empty() {
            return Ok(0);
        }
        let mut body = String::new();
        for doc in documents {
            let action = json!({"index": {"_index": self.config.index_name, "_id": doc.id.to_string()}});
            let source: Map<String, Value> = doc
                .source()
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect();
            body.push_str(&action.to_string());
            body.push('\n');
            body.push_str(&Value::Object(source).to_string());
            body.push('\n');
        }

        let response = self.send_bulk(body).await?;
        let total = documents.len();
        let failures = response.failures();
        if let Some(first_error) = failures.first() {
            error!(type_name = %type_name, failed = failures.len(), total, "Bulk index rejected documents");
            return Err(SearchError::BulkRejected {
                failed: failures.len(),
                total,
                first_error: first_error.clone(),
            });
        }
        info!(type_name = %type_name, count = total, "Indexed documents");
        Ok(total)
    }

    async fn delete_documents(&self, ids: &[DocumentId]) -> Result<usize, SearchError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut body = String::new();
        for id in ids {
            let action = json!({"delete": {"_index": self.config.index_name, "_id": id.to_string()}});
            body.push_str(&action.to_string());
            body.push('\n');
        }

        let response = self.send_bulk(body).await?;
        let failures = response.failures();
        if let Some(first_error) = failures.first() {
            return Err(SearchError::BulkRejected {
                failed: failures.len(),
                total: ids.len(),
                first_error: first_error.clone(),
            });
        }
        let deleted = response
            .items
            .iter()
            .filter_map(|item| item.values().next())
            .filter(|result| result.result.as_deref() == Some("deleted"))
            .count();
        info!(requested = ids.len(), deleted, "Deleted documents");
        Ok(deleted)
    }

    async fn refresh(&self) -> Result<(), SearchError> {
        let response = self
            .client
            .post(self.index_url("/_refresh"))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.check(response).await?;
        Ok(())
    }

    async fn ensure_mapping(&self, mapping: &FieldMapping) -> Result<(), SearchError> {
        let properties: Map<String, Value> = mapping
            .iter()
            .map(|(name, spec)| (name.clone(), property(spec.field_type)))
            .collect();

        let exists = self
            .client
            .head(self.index_url(""))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let sent = if exists.status() == StatusCode::NOT_FOUND {
            info!(index = %self.config.index_name, "Creating index");
            self.client
                .put(self.index_url(""))
                .json(&json!({"mappings": {"properties": properties}}))
                .send()
                .await
        } else {
            self.client
                .put(self.index_url("/_mapping"))
                .json(&json!({"properties": properties}))
                .send()
                .await
        };
        let response = sent.map_err(|e| self.transport_error(e))?;
        self.check(response).await?;
        Ok(())
    }
}

fn property(field_type: FieldType) -> Value {
    match field_type {
        FieldType::Date => json!({"type": "date", "format": ES_DATE_FORMAT}),
        other => json!({"type": other.as_str()}),
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    took: Option<u64>,
    hits: HitsEnvelope,
    #[serde(default)]
    aggregations: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct HitsEnvelope {
    total: Option<TotalHits>,
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TotalHits {
    Object { value: u64 },
    Count(u64),
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score")]
    score: Option<f32>,
    #[serde(rename = "_source", default)]
    source: Map<String, Value>,
    #[serde(default)]
    highlight: BTreeMap<String, Vec<String>>,
}

impl From<Hit> for RawHit {
    fn from(hit: Hit) -> Self {
        RawHit {
            id: hit.id,
            score: hit.score,
            source: hit.source,
            highlights: hit.highlight,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Bucket {
    key: Value,
    doc_count: u64,
    #[serde(flatten)]
    sub_aggregations: Map<String, Value>,
}

impl SearchResponse {
    /// Convert to the engine-neutral shape, keeping aggregations in the
    /// order they were requested. A returned aggregation whose buckets do
    /// not decode fails the whole response.
    fn into_raw(self, query: &SearchQuery) -> Result<RawSearchResponse, SearchError> {
        let total_hits = match self.hits.total {
            Some(TotalHits::Object { value }) | Some(TotalHits::Count(value)) => value,
            None => self.hits.hits.len() as u64,
        };

        let mut aggregations = Vec::with_capacity(query.aggregations.len());
        for agg in &query.aggregations {
            let Some(returned) = self.aggregations.get(&agg.name) else {
                continue;
            };
            let buckets = returned.get("buckets").cloned().ok_or_else(|| {
                SearchError::MalformedResponse(format!("aggregation {} has no buckets", agg.name))
            })?;
            let buckets: Vec<Bucket> = serde_json::from_value(buckets).map_err(|e| {
                SearchError::MalformedResponse(format!("aggregation {}: {e}", agg.name))
            })?;
            aggregations.push(RawAggregation {
                name: agg.name.clone(),
                buckets: buckets.into_iter().map(raw_bucket).collect(),
            });
        }

        Ok(RawSearchResponse {
            total_hits,
            took_ms: self.took,
            hits: self.hits.hits.into_iter().map(RawHit::from).collect(),
            aggregations,
        })
    }
}

fn raw_bucket(bucket: Bucket) -> RawBucket {
    let key = match bucket.key {
        Value::String(s) => s,
        other => other.to_string(),
    };
    let max_score = bucket
        .sub_aggregations
        .get(MAX_SCORE_AGG)
        .and_then(|m| m.get("value"))
        .and_then(Value::as_f64)
        .map(|v| v as f32);
    let top_hits = bucket
        .sub_aggregations
        .get(TOP_HITS_AGG)
        .and_then(|t| t.get("hits"))
        .and_then(|h| h.get("hits"))
        .cloned()
        .and_then(|hits| serde_json::from_value::<Vec<Hit>>(hits).ok())
        .unwrap_or_default()
        .into_iter()
        .map(RawHit::from)
        .collect();
    RawBucket {
        key,
        doc_count: bucket.doc_count,
        max_score,
        top_hits,
    }
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<BTreeMap<String, BulkItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    #[serde(rename = "_id")]
    id: Option<String>,
    status: Option<u16>,
    result: Option<String>,
    error: Option<Value>,
}

impl BulkResponse {
    /// `id: reason` of every rejected item.
    fn failures(&self) -> Vec<String> {
        if !self.errors {
            return Vec::new();
        }
        self.items
            .iter()
            .filter_map(|item| item.values().next())
            // deleting a missing document is not a failure
            .filter(|item| item.error.is_some() && item.status != Some(404))
            .map(|item| {
                let reason = item
                    .error
                    .as_ref()
                    .and_then(|e| e.get("reason"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                format!("{}: {reason}", item.id.as_deref().unwrap_or("?"))
            })
            .collect()
    }
}
