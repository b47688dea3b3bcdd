//! Stale document pruning.
//!
//! Each run deletes at most one batch of documents whose `LastEdited` is
//! older than the cutoff, then reschedules itself: soon while a full batch
//! suggests a backlog, after the repeat interval otherwise, or not at all
//! for a one-shot prune.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use sift_query::{BoolQuery, QueryClause, RangeQuery, SearchQuery, SortClause, SortDirection};
use sift_search::{SearchEngine, SearchError};
use sift_types::{format_date, system, DocumentId, PruneSettings};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SchedulerError;
use crate::job::{JobQueue, ScheduledJob};
use crate::registry::JobOutput;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalePruneConfig {
    /// `Field:value` restriction; anything else is used as a query string
    pub filter: Option<String>,
    pub older_than: Duration,
    /// Zero prunes once
    pub repeat: Duration,
    pub batch_size: usize,
    /// Delay before the next run after a full batch
    pub backlog_backoff: Duration,
}

impl Default for StalePruneConfig {
    fn default() -> Self {
        Self::from(&PruneSettings::default())
    }
}

impl From<&PruneSettings> for StalePruneConfig {
    fn from(settings: &PruneSettings) -> Self {
        Self {
            filter: settings.filter.clone().filter(|f| !f.trim().is_empty()),
            older_than: DAY * settings.older_than_days,
            repeat: Duration::from_secs(settings.repeat_secs),
            batch_size: settings.batch_size.max(1),
            backlog_backoff: Duration::from_secs(settings.backlog_backoff_secs),
        }
    }
}

impl StalePruneConfig {
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_older_than_days(mut self, days: u32) -> Self {
        self.older_than = DAY * days;
        self
    }

    pub fn with_repeat(mut self, repeat: Duration) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_backlog_backoff(mut self, backoff: Duration) -> Self {
        self.backlog_backoff = backoff;
        self
    }
}

/// Outcome of one prune batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneBatch {
    /// Documents the query returned, at most the batch size
    pub matched: usize,
    /// Documents the engine reported deleted
    pub deleted: usize,
}

/// Recurring job deleting documents not edited since the cutoff.
pub struct StalePruneJob {
    name: String,
    engine: Arc<dyn SearchEngine>,
    config: StalePruneConfig,
}

impl StalePruneJob {
    pub fn new(engine: Arc<dyn SearchEngine>, config: StalePruneConfig) -> Self {
        let name = match &config.filter {
            Some(filter) => format!("stale-prune:{filter}"),
            None => "stale-prune".to_string(),
        };
        Self {
            name,
            engine,
            config,
        }
    }

    pub fn config(&self) -> &StalePruneConfig {
        &self.config
    }

    /// Documents last edited before this time are stale.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        TimeDelta::from_std(self.config.older_than)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Stale documents, oldest first. Not restricted to a stage.
    pub fn query(&self, now: DateTime<Utc>) -> SearchQuery {
        let mut clauses = vec![QueryClause::Range(RangeQuery::less_than(
            system::LAST_EDITED,
            format_date(&self.cutoff(now)),
        ))];
        if let Some(filter) = &self.config.filter {
            clauses.push(filter_clause(filter));
        }
        SearchQuery {
            query: QueryClause::Bool(BoolQuery::all_of(clauses)),
            post_filter: None,
            aggregations: vec![],
            sort: vec![SortClause {
                field: system::LAST_EDITED.to_string(),
                direction: SortDirection::Asc,
            }],
            highlight: None,
        }
    }

    /// Total documents currently eligible for pruning.
    pub async fn estimate(&self) -> Result<u64, SearchError> {
        let response = self.engine.search(&self.query(Utc::now()), 0, 0).await?;
        Ok(response.total_hits)
    }

    /// Delete one batch of stale documents.
    pub async fn prune_batch(&self, now: DateTime<Utc>) -> Result<PruneBatch, SearchError> {
        let response = self
            .engine
            .search(&self.query(now), 0, self.config.batch_size)
            .await?;

        let ids: Vec<DocumentId> = response
            .hits
            .iter()
            .filter_map(|hit| match hit.id.parse::<DocumentId>() {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(id = %hit.id, error = %e, "Skipping hit with malformed id");
                    None
                }
            })
            .collect();
        let matched = response.hits.len();
        if ids.is_empty() {
            return Ok(PruneBatch {
                matched,
                deleted: 0,
            });
        }

        let deleted = self.engine.delete_documents(&ids).await?;
        self.engine.refresh().await?;
        debug!(matched, deleted, remaining = response.total_hits.saturating_sub(matched as u64), "Prune batch done");
        Ok(PruneBatch { matched, deleted })
    }

    /// When to run next after a batch that matched `matched` documents.
    ///
    /// `None` ends a one-shot prune.
    pub fn next_run(&self, matched: usize, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if matched >= self.config.batch_size {
            return Some(after(now, self.config.backlog_backoff));
        }
        self.repeat_run(now)
    }

    fn repeat_run(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (!self.config.repeat.is_zero()).then(|| after(now, self.config.repeat))
    }

    fn reschedule(
        self: &Arc<Self>,
        queue: &dyn JobQueue,
        run_at: Option<DateTime<Utc>>,
    ) -> Result<(), SchedulerError> {
        match run_at {
            Some(run_at) => {
                queue.schedule(self.clone(), run_at)?;
                info!(job = %self.name, run_at = %run_at, "Prune rescheduled");
            }
            None => info!(job = %self.name, "One-shot prune finished"),
        }
        Ok(())
    }
}

#[async_trait]
impl ScheduledJob for StalePruneJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn title(&self) -> String {
        format!(
            "Prune stale documents {}",
            self.config.filter.as_deref().unwrap_or_default()
        )
        .trim_end()
        .to_string()
    }

    async fn run(
        self: Arc<Self>,
        queue: &dyn JobQueue,
        cancel: CancellationToken,
    ) -> Result<JobOutput, SchedulerError> {
        if cancel.is_cancelled() {
            info!(job = %self.name, "Prune cancelled before start");
            return Ok(JobOutput::new().with_metadata("cancelled", "true"));
        }

        let now = Utc::now();
        let batch = tokio::select! {
            batch = self.prune_batch(now) => batch,
            _ = cancel.cancelled() => {
                // deletions already sent stay deleted; the next run re-evaluates
                info!(job = %self.name, "Prune cancelled mid-batch");
                return Ok(JobOutput::new().with_metadata("cancelled", "true"));
            }
        };

        match batch {
            Ok(batch) => {
                info!(
                    job = %self.name,
                    matched = batch.matched,
                    deleted = batch.deleted,
                    cutoff = %format_date(&self.cutoff(now)),
                    "Pruned stale documents"
                );
                self.reschedule(queue, self.next_run(batch.matched, Utc::now()))?;
                Ok(JobOutput::new()
                    .with_prune_count(batch.deleted)
                    .with_metadata("matched", batch.matched.to_string()))
            }
            Err(e) => {
                warn!(job = %self.name, error = %e, "Prune batch failed");
                self.reschedule(queue, self.repeat_run(Utc::now()))?;
                Err(SchedulerError::PruneBatch(e))
            }
        }
    }
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `Field:value` becomes an exact term; other expressions are query strings.
fn filter_clause(filter: &str) -> QueryClause {
    match filter.split_once(':') {
        Some((field, value))
            if !field.trim().is_empty()
                && !value.trim().is_empty()
                && !field.contains(char::is_whitespace)
                && !value.trim().contains(char::is_whitespace) =>
        {
            QueryClause::term(field.trim(), value.trim())
        }
        _ => QueryClause::query_string(filter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::MemoryJobQueue;
    use serde_json::json;
    use sift_search::{RawSearchResponse, TantivyEngine};
    use sift_types::{system_mapping, Document, FieldMapping, FieldSpec, FieldType, Stage};

    fn mapping() -> FieldMapping {
        let mut mapping = system_mapping();
        mapping.insert("Title".into(), FieldSpec::new(FieldType::Text));
        mapping
    }

    async fn engine_with(stale: u64, fresh: u64) -> Arc<TantivyEngine> {
        let engine = TantivyEngine::in_memory(&mapping()).unwrap();
        let old = Utc::now() - TimeDelta::days(60);
        let mut docs: Vec<Document> = (1..=stale)
            .map(|i| {
                Document::new("Article", i, Stage::Live)
                    .with_field("Title", "old news")
                    .with_last_edited(old)
            })
            .collect();
        docs.extend((1..=fresh).map(|i| {
            Document::new("Article", 10_000 + i, Stage::Live).with_field("Title", "today")
        }));
        engine.index_documents("Article", &docs).await.unwrap();
        Arc::new(engine)
    }

    struct FailingEngine;

    #[async_trait]
    impl SearchEngine for FailingEngine {
        async fn search(
            &self,
            _query: &SearchQuery,
            _offset: usize,
            _limit: usize,
        ) -> Result<RawSearchResponse, SearchError> {
            Err(SearchError::Timeout(500))
        }

        async fn index_documents(
            &self,
            _type_name: &str,
            _documents: &[Document],
        ) -> Result<usize, SearchError> {
            Ok(0)
        }

        async fn delete_documents(&self, _ids: &[DocumentId]) -> Result<usize, SearchError> {
            Ok(0)
        }

        async fn refresh(&self) -> Result<(), SearchError> {
            Ok(())
        }

        async fn ensure_mapping(&self, _mapping: &FieldMapping) -> Result<(), SearchError> {
            Ok(())
        }
    }

    fn delay_secs(run_at: DateTime<Utc>) -> i64 {
        (run_at - Utc::now()).num_seconds()
    }

    #[tokio::test]
    async fn test_backlog_drains_in_batches() {
        let engine = engine_with(1200, 5).await;
        let job = Arc::new(StalePruneJob::new(engine.clone(), StalePruneConfig::default()));
        assert_eq!(job.estimate().await.unwrap(), 1200);

        let queue = MemoryJobQueue::new();
        queue.schedule(job.clone(), Utc::now()).unwrap();

        let mut counts = Vec::new();
        while let Some((_, result)) = queue.run_next(CancellationToken::new()).await.unwrap() {
            counts.push(result.unwrap().get("prune_count").unwrap().to_string());
            if let Some(next) = queue.pending().unwrap().first() {
                let delay = delay_secs(next.run_at);
                assert!((3590..=3600).contains(&delay), "backlog delay was {delay}s");
            }
        }

        assert_eq!(counts, vec!["500", "500", "200"]);
        assert!(queue.is_empty());
        assert_eq!(engine.num_docs(), 5);
        assert_eq!(job.estimate().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_repeat_after_drain() {
        let engine = engine_with(3, 0).await;
        let config = StalePruneConfig::default()
            .with_batch_size(2)
            .with_repeat(DAY);
        let job = Arc::new(StalePruneJob::new(engine, config));
        let queue = MemoryJobQueue::new();
        queue.schedule(job, Utc::now()).unwrap();

        let (_, first) = queue.run_next(CancellationToken::new()).await.unwrap().unwrap();
        assert_eq!(first.unwrap().get("prune_count"), Some("2"));
        assert!(delay_secs(queue.pending().unwrap()[0].run_at) <= 3600);

        let (_, second) = queue.run_next(CancellationToken::new()).await.unwrap().unwrap();
        assert_eq!(second.unwrap().get("prune_count"), Some("1"));
        let pending = queue.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert!(delay_secs(pending[0].run_at) > 86_000);
    }

    #[tokio::test]
    async fn test_nothing_stale_one_shot_stops() {
        let engine = engine_with(0, 4).await;
        let job = Arc::new(StalePruneJob::new(engine.clone(), StalePruneConfig::default()));
        let queue = MemoryJobQueue::new();
        queue.schedule(job, Utc::now()).unwrap();

        let (_, result) = queue.run_next(CancellationToken::new()).await.unwrap().unwrap();
        assert_eq!(result.unwrap().get("prune_count"), Some("0"));
        assert!(queue.is_empty());
        assert_eq!(engine.num_docs(), 4);
    }

    #[tokio::test]
    async fn test_filter_restricts_pruning() {
        let engine = engine_with(2, 0).await;
        let old = Utc::now() - TimeDelta::days(90);
        engine
            .index_documents(
                "Page",
                &[Document::new("Page", 1, Stage::Draft).with_last_edited(old)],
            )
            .await
            .unwrap();

        let config = StalePruneConfig::default().with_filter("ClassName:Page");
        let job = Arc::new(StalePruneJob::new(engine.clone(), config));
        let batch = job.prune_batch(Utc::now()).await.unwrap();
        assert_eq!(batch, PruneBatch { matched: 1, deleted: 1 });
        assert_eq!(engine.num_docs(), 2);
    }

    #[tokio::test]
    async fn test_engine_error_fails_run_but_keeps_schedule() {
        let config = StalePruneConfig::default().with_repeat(Duration::from_secs(600));
        let job = Arc::new(StalePruneJob::new(Arc::new(FailingEngine), config));
        let queue = MemoryJobQueue::new();
        queue.schedule(job, Utc::now()).unwrap();

        let (_, result) = queue.run_next(CancellationToken::new()).await.unwrap().unwrap();
        assert!(matches!(result, Err(SchedulerError::PruneBatch(_))));
        let pending = queue.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert!((590..=600).contains(&delay_secs(pending[0].run_at)));
    }

    #[tokio::test]
    async fn test_engine_error_one_shot_not_rescheduled() {
        let job = Arc::new(StalePruneJob::new(
            Arc::new(FailingEngine),
            StalePruneConfig::default(),
        ));
        let queue = MemoryJobQueue::new();
        queue.schedule(job, Utc::now()).unwrap();
        let (_, result) = queue.run_next(CancellationToken::new()).await.unwrap().unwrap();
        assert!(result.is_err());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_run_does_nothing() {
        let engine = engine_with(3, 0).await;
        let job = Arc::new(StalePruneJob::new(engine.clone(), StalePruneConfig::default()));
        let queue = MemoryJobQueue::new();
        queue.schedule(job, Utc::now()).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let (_, result) = queue.run_next(cancel).await.unwrap().unwrap();
        assert_eq!(result.unwrap().get("cancelled"), Some("true"));
        assert_eq!(engine.num_docs(), 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_query_shape() {
        let job = StalePruneJob::new(
            Arc::new(FailingEngine),
            StalePruneConfig::default().with_filter("ClassName:Article"),
        );
        let now = Utc::now();
        let body = job.query(now).to_json();
        assert_eq!(
            body["query"]["bool"]["must"][0]["range"]["LastEdited"]["lt"],
            json!(format_date(&(now - TimeDelta::days(30))))
        );
        assert_eq!(
            body["query"]["bool"]["must"][1],
            json!({"term": {"ClassName": "Article"}})
        );
        assert_eq!(body["sort"], json!([{"LastEdited": {"order": "asc"}}]));
    }

    #[test]
    fn test_filter_clause_forms() {
        assert_eq!(
            filter_clause("Category:News"),
            QueryClause::term("Category", "News")
        );
        assert_eq!(
            filter_clause("Title:old news"),
            QueryClause::query_string("Title:old news")
        );
        assert_eq!(filter_clause("stale"), QueryClause::query_string("stale"));
    }

    #[test]
    fn test_title_and_name() {
        let plain = StalePruneJob::new(Arc::new(FailingEngine), StalePruneConfig::default());
        assert_eq!(plain.title(), "Prune stale documents");
        assert_eq!(plain.name(), "stale-prune");

        let filtered = StalePruneJob::new(
            Arc::new(FailingEngine),
            StalePruneConfig::default().with_filter("ClassName:Page"),
        );
        assert_eq!(filtered.title(), "Prune stale documents ClassName:Page");
        assert_eq!(filtered.name(), "stale-prune:ClassName:Page");
    }

    #[test]
    fn test_config_from_settings() {
        let settings = PruneSettings {
            filter: Some("  ".into()),
            older_than_days: 7,
            repeat_secs: 60,
            batch_size: 0,
            backlog_backoff_secs: 10,
        };
        let config = StalePruneConfig::from(&settings);
        assert_eq!(config.filter, None);
        assert_eq!(config.older_than, DAY * 7);
        assert_eq!(config.repeat, Duration::from_secs(60));
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.backlog_backoff, Duration::from_secs(10));
    }
}
