//! Command implementations for `sift`.
//!
//! Each command loads settings, opens the configured engine and runs one
//! operation against it. Results go to stdout, logs to stderr.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::signal;
use tracing::{info, warn};

use sift_indexing::{
    reindex_staged, DocumentIndexer, IndexAction, LoggingProgressCallback, MemoryRecordSource,
    Record, ReindexConfig, ReindexReport,
};
use sift_scheduler::{
    JobQueue, JobStatus, ScheduledJob, SchedulerConfig, SchedulerService, StalePruneConfig,
    StalePruneJob,
};
use sift_search::profile::{LIMIT_PARAM, QUERY_PARAM, START_PARAM};
use sift_search::{
    ElasticConfig, ElasticEngine, FacetGroup, PaginatedResult, RequestParams, SearchEngine,
    SearchExecutor, SearchIndexConfig, SearchProfile, SelectedFacet, TantivyEngine,
};
use sift_types::{DocumentId, EngineKind, FieldRegistry, PruneSettings, Settings, Stage};

use crate::cli::{Cli, QueryArgs};

/// Load settings and apply global CLI overrides.
pub fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(level) = &cli.log_level {
        settings.log_level = level.clone();
    }
    if let Some(path) = &cli.index_path {
        settings.engine.index_path = path.clone();
    }
    Ok(settings)
}

/// Log to stderr; `RUST_LOG` wins over the configured level.
pub fn init_logging(level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Open the configured engine with a mapping covering every configured type.
pub async fn open_engine(
    settings: &Settings,
    registry: &FieldRegistry,
) -> Result<Arc<dyn SearchEngine>> {
    let mapping = registry.mapping();
    match settings.engine.kind {
        EngineKind::Local => {
            let path = settings.index_path();
            std::fs::create_dir_all(&path)
                .with_context(|| format!("Failed to create index directory {}", path.display()))?;
            info!(path = %path.display(), "Opening local index");
            let config = SearchIndexConfig::new(path).with_memory_mb(settings.engine.writer_memory_mb);
            let engine = TantivyEngine::open(config, &mapping).context("Failed to open index")?;
            Ok(Arc::new(engine))
        }
        EngineKind::Elastic => {
            info!(url = %settings.engine.url, index = %settings.engine.index_name, "Using remote engine");
            let engine = ElasticEngine::new(ElasticConfig::from(&settings.engine))
                .context("Failed to create engine client")?;
            engine
                .ensure_mapping(&mapping)
                .await
                .context("Failed to update index mapping")?;
            Ok(Arc::new(engine))
        }
    }
}

/// Profile from search settings plus the request's facet and boost flags.
pub fn search_profile(settings: &Settings, args: &QueryArgs) -> SearchProfile {
    let mut profile = SearchProfile::from_settings(&settings.search);
    for (field, label) in &args.facets {
        profile = profile.with_facet(field.clone(), label.clone());
    }
    for (field, boost) in &args.boosts {
        profile = profile.with_boost(field.clone(), *boost);
    }
    for type_name in &args.types {
        profile = profile.with_filter_type(type_name.clone());
    }
    if args.browse {
        profile.allow_empty = true;
    }
    profile
}

/// Request parameters from the query text, `--params` and paging flags.
pub fn request_params(args: &QueryArgs) -> RequestParams {
    let mut params = RequestParams::parse(&args.params);
    if !args.query.trim().is_empty() {
        params.set(QUERY_PARAM, args.query.trim());
    }
    if let Some(start) = args.start {
        params.set(START_PARAM, start.to_string());
    }
    if let Some(limit) = args.limit {
        params.set(LIMIT_PARAM, limit.to_string());
    }
    params
}

/// One page of results with its facet groups.
#[derive(Debug, Serialize)]
pub struct SearchOutput {
    pub query: String,
    pub result: PaginatedResult,
    pub facets: Vec<FacetGroup>,
    pub selected: Vec<SelectedFacet>,
}

pub async fn run_search(
    engine: Arc<dyn SearchEngine>,
    settings: &Settings,
    registry: &FieldRegistry,
    args: &QueryArgs,
) -> Result<SearchOutput> {
    let profile = search_profile(settings, args);
    let params = request_params(args);
    let request = profile.request(&params, registry, args.stage);

    let executor = SearchExecutor::new(engine)
        .with_timeout(Duration::from_millis(settings.engine.timeout_ms));
    let result = executor
        .execute(&request.builder.compile(), request.offset, request.limit)
        .await?;

    let aggregator = profile.facet_aggregator();
    let facets = aggregator.aggregate(&result.aggregations, &params);
    let selected = aggregator.selected(&params);
    Ok(SearchOutput {
        query: args.query.clone(),
        result,
        facets,
        selected,
    })
}

/// Engine request body the search would send.
pub fn explain(settings: &Settings, registry: &FieldRegistry, args: &QueryArgs) -> Value {
    let profile = search_profile(settings, args);
    let request = profile.request(&request_params(args), registry, args.stage);
    request
        .builder
        .compile()
        .to_request_body(request.offset, request.limit)
}

pub fn render_search(output: &SearchOutput) -> String {
    let result = &output.result;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} result(s) for \"{}\" (page {} of {}, {:.1} ms)",
        result.total_count,
        output.query,
        result.current_page(),
        result.total_pages().max(1),
        result.elapsed_ms
    );

    for (i, hit) in result.items.iter().enumerate() {
        let _ = write!(out, "\n{:>3}. {}", result.offset.saturating_add(i + 1), hit.id);
        if let Some(score) = hit.score {
            let _ = write!(out, "  (score {score:.2})");
        }
        out.push('\n');
        if let Some(title) = hit.text("Title") {
            let _ = writeln!(out, "     {title}");
        }
        for (field, fragments) in &hit.highlights {
            let _ = writeln!(out, "     {field}: {}", fragments.join(" ... "));
        }
    }

    if !output.selected.is_empty() {
        out.push_str("\nSelected:\n");
        for selection in &output.selected {
            let _ = writeln!(
                out,
                "  {}: {}  [remove: {}]",
                selection.label, selection.value, selection.remove_link
            );
        }
    }

    for group in &output.facets {
        let _ = writeln!(out, "\n{}", group.label);
        for bucket in &group.buckets {
            let mark = if bucket.selected { "x" } else { " " };
            let _ = writeln!(
                out,
                "  [{mark}] {} ({})  {}",
                bucket.key, bucket.count, bucket.link
            );
        }
    }
    out
}

/// Counts of what `index` did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct IndexSummary {
    pub indexed: usize,
    pub buffered: usize,
    pub removed: usize,
    pub failed: usize,
    /// Documents written when the bulk session ended
    pub flushed: usize,
}

/// Index records from a JSON file.
///
/// Records go to the stages they exist in unless `stage` forces one.
/// Single-write failures are logged and counted; a failed bulk flush is an
/// error after the other types were flushed.
pub async fn run_index(
    engine: Arc<dyn SearchEngine>,
    registry: FieldRegistry,
    file: &Path,
    bulk: bool,
    stage: Option<Stage>,
) -> Result<IndexSummary> {
    let mut records = Record::load_all(file)
        .with_context(|| format!("Failed to read records from {}", file.display()))?;
    Record::resolve_parents(&mut records);

    let indexer = DocumentIndexer::new(engine.clone()).with_registry(registry);
    if bulk {
        indexer.start_bulk()?;
    }

    let mut summary = IndexSummary::default();
    for record in &records {
        let stages = match stage {
            Some(stage) => vec![stage],
            None => record.stages(),
        };
        for stage in stages {
            match indexer.index(record, stage).await {
                Ok(IndexAction::Indexed) => summary.indexed += 1,
                Ok(IndexAction::Buffered) => summary.buffered += 1,
                Ok(IndexAction::Removed) => summary.removed += 1,
                Err(e) => {
                    warn!(type_name = %record.type_name, id = record.id, stage = %stage, error = %e, "Record not indexed");
                    summary.failed += 1;
                }
            }
        }
    }

    if bulk {
        let report = indexer.end_bulk().await.context("Bulk flush failed")?;
        for (type_name, count) in &report.flushed {
            info!(type_name = %type_name, count, "Flushed bulk buffer");
        }
        summary.flushed = report.total();
    }
    engine.refresh().await?;
    Ok(summary)
}

/// Remove a record's documents. Returns how many existed.
pub async fn run_remove(
    engine: Arc<dyn SearchEngine>,
    type_name: &str,
    id: u64,
    stage: Option<Stage>,
) -> Result<usize> {
    let stages = match stage {
        Some(stage) => vec![stage],
        None => vec![Stage::Draft, Stage::Live, Stage::Unversioned],
    };
    let indexer = DocumentIndexer::new(engine.clone());
    let mut removed = 0;
    for stage in stages {
        if indexer.remove_id(&DocumentId::new(type_name, id, stage)).await? {
            removed += 1;
        }
    }
    engine.refresh().await?;
    Ok(removed)
}

pub async fn run_reindex(
    engine: Arc<dyn SearchEngine>,
    registry: FieldRegistry,
    file: &Path,
    config: ReindexConfig,
) -> Result<ReindexReport> {
    let records = Record::load_all(file)
        .with_context(|| format!("Failed to read records from {}", file.display()))?;
    let source = MemoryRecordSource::from_records(records);
    let indexer = DocumentIndexer::new(engine.clone()).with_registry(registry.clone());
    let report = reindex_staged(&indexer, &source, &registry, &config, &LoggingProgressCallback)
        .await
        .context("Reindex failed")?;
    engine.refresh().await?;
    Ok(report)
}

pub fn render_reindex(report: &ReindexReport) -> String {
    let mut out = String::new();
    for (type_name, stage, written) in &report.stages {
        let _ = writeln!(out, "{type_name:<24} {stage:<12} {written}");
    }
    let progress = &report.progress;
    let _ = writeln!(
        out,
        "processed {}, indexed {}, removed {}, errors {} in {} ms",
        progress.total_processed, progress.indexed, progress.removed, progress.errors, report.elapsed_ms
    );
    if !progress.skipped_types.is_empty() {
        let _ = writeln!(out, "skipped: {}", progress.skipped_types.join(", "));
    }
    out
}

/// Run the prune job on the scheduler until nothing is left to run or
/// Ctrl-C. Returns the job's final status.
pub async fn run_prune(
    engine: Arc<dyn SearchEngine>,
    prune: &PruneSettings,
) -> Result<Option<JobStatus>> {
    let job = Arc::new(StalePruneJob::new(engine, StalePruneConfig::from(prune)));
    let scheduler = SchedulerService::new(SchedulerConfig::default());
    scheduler.schedule(job.clone(), Utc::now())?;
    scheduler.start()?;

    tokio::select! {
        _ = scheduler.wait_idle() => {
            info!("Prune queue drained");
        }
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }
    scheduler.shutdown().await?;
    Ok(scheduler.registry().get_status(job.name()))
}

pub async fn prune_estimate(engine: Arc<dyn SearchEngine>, prune: &PruneSettings) -> Result<u64> {
    let job = StalePruneJob::new(engine, StalePruneConfig::from(prune));
    Ok(job.estimate().await?)
}

pub fn render_job_status(status: &JobStatus) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} ({})", status.title, status.job_name);
    let _ = writeln!(
        out,
        "  runs: {}, errors: {}, last result: {:?}",
        status.run_count, status.error_count, status.last_result
    );
    if let Some(count) = status.last_run_metadata.get("prune_count") {
        let _ = writeln!(out, "  deleted in last run: {count}");
    }
    if let Some(next) = status.next_run {
        let _ = writeln!(out, "  next run: {next}");
    }
    out
}

/// Effective settings as TOML.
pub fn show_config(settings: &Settings) -> Result<String> {
    toml::to_string_pretty(settings).context("Failed to render settings")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use pretty_assertions::assert_eq;
    use sift_types::{FieldType, TypeDefinition};
    use std::io::Write;
    use tempfile::TempDir;

    use crate::cli::Commands;

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.types = vec![
            TypeDefinition::new("Article")
                .with_field("Title", FieldType::Text)
                .with_field("Content", FieldType::Text)
                .with_field("Category", FieldType::Keyword),
            TypeDefinition::new("File")
                .with_field("Title", FieldType::Text)
                .unversioned(),
        ];
        settings
    }

    fn query_args(args: &[&str]) -> QueryArgs {
        let mut argv = vec!["sift", "explain"];
        argv.extend_from_slice(args);
        match Cli::parse_from(argv).command {
            Commands::Explain { query } => query,
            _ => unreachable!(),
        }
    }

    fn write_records(dir: &TempDir, json: &str) -> std::path::PathBuf {
        let path = dir.path().join("records.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(json.as_bytes()).unwrap();
        path
    }

    const RECORDS: &str = r#"[
        {"type": "Article", "id": 1, "published": true,
         "fields": {"Title": "Open source licensing", "Content": "About licences", "Category": "A"}},
        {"type": "Article", "id": 2, "published": true,
         "fields": {"Title": "Gardening", "Content": "Open source seeds", "Category": "A"}},
        {"type": "Article", "id": 3, "published": true,
         "fields": {"Title": "Open source tools", "Content": "Editors", "Category": "B"}},
        {"type": "Article", "id": 4,
         "fields": {"Title": "Open source draft", "Content": "Unpublished", "Category": "B"}},
        {"type": "File", "id": 9, "versioned": false,
         "fields": {"Title": "Open source handbook"}}
    ]"#;

    async fn indexed_engine(dir: &TempDir, bulk: bool) -> (Arc<dyn SearchEngine>, IndexSummary) {
        let settings = settings();
        let registry = FieldRegistry::from_definitions(&settings.types);
        let engine: Arc<dyn SearchEngine> =
            Arc::new(TantivyEngine::in_memory(&registry.mapping()).unwrap());
        let path = write_records(dir, RECORDS);
        let summary = run_index(engine.clone(), registry, &path, bulk, None)
            .await
            .unwrap();
        (engine, summary)
    }

    #[tokio::test]
    async fn test_index_places_records_in_their_stages() {
        let dir = TempDir::new().unwrap();
        let (_, summary) = indexed_engine(&dir, false).await;
        // 3 published articles x 2 stages, 1 draft-only article, 1 unversioned file
        assert_eq!(
            summary,
            IndexSummary {
                indexed: 8,
                ..Default::default()
            }
        );
    }

    #[tokio::test]
    async fn test_bulk_index_flushes_at_end() {
        let dir = TempDir::new().unwrap();
        let (_, summary) = indexed_engine(&dir, true).await;
        assert_eq!(summary.buffered, 8);
        assert_eq!(summary.flushed, 8);
        assert_eq!(summary.indexed, 0);
    }

    #[tokio::test]
    async fn test_search_with_facets_and_selection() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = indexed_engine(&dir, false).await;
        let settings = settings();
        let registry = FieldRegistry::from_definitions(&settings.types);

        let args = query_args(&["open source", "-f", "Category", "-t", "Article"]);
        let output = run_search(engine.clone(), &settings, &registry, &args)
            .await
            .unwrap();
        assert_eq!(output.result.total_count, 3);
        let buckets: Vec<(&str, u64)> = output.facets[0]
            .buckets
            .iter()
            .map(|b| (b.key.as_str(), b.count))
            .collect();
        assert_eq!(buckets, vec![("A", 2), ("B", 1)]);

        let args = query_args(&[
            "open source",
            "-f",
            "Category",
            "-t",
            "Article",
            "--params",
            "aggregation[Category][]=B",
        ]);
        let output = run_search(engine, &settings, &registry, &args).await.unwrap();
        assert_eq!(output.result.total_count, 1);
        assert_eq!(output.selected.len(), 1);
        assert!(render_search(&output).contains("[x] B (1)"));
    }

    #[tokio::test]
    async fn test_draft_stage_sees_unpublished() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = indexed_engine(&dir, false).await;
        let settings = settings();
        let registry = FieldRegistry::from_definitions(&settings.types);

        let live = run_search(engine.clone(), &settings, &registry, &query_args(&["draft"]))
            .await
            .unwrap();
        assert_eq!(live.result.total_count, 0);

        let draft = run_search(
            engine,
            &settings,
            &registry,
            &query_args(&["draft", "--stage", "draft"]),
        )
        .await
        .unwrap();
        assert_eq!(draft.result.total_count, 1);
        assert_eq!(draft.result.items[0].id, "Article_4_Stage");
    }

    #[tokio::test]
    async fn test_remove_every_stage() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = indexed_engine(&dir, false).await;
        assert_eq!(run_remove(engine.clone(), "Article", 1, None).await.unwrap(), 2);
        assert_eq!(run_remove(engine, "Article", 1, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reindex_from_file() {
        let dir = TempDir::new().unwrap();
        let settings = settings();
        let registry = FieldRegistry::from_definitions(&settings.types);
        let engine: Arc<dyn SearchEngine> =
            Arc::new(TantivyEngine::in_memory(&registry.mapping()).unwrap());
        let path = write_records(&dir, RECORDS);

        let report = run_reindex(engine, registry, &path, ReindexConfig::default())
            .await
            .unwrap();
        assert_eq!(report.progress.indexed, 8);
        assert_eq!(report.failures(), 0);
        assert!(render_reindex(&report).contains("indexed 8"));
    }

    #[tokio::test]
    async fn test_prune_one_shot_on_scheduler() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = indexed_engine(&dir, false).await;
        let prune = PruneSettings {
            older_than_days: 0,
            ..Default::default()
        };
        // every document was edited before "now"
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(prune_estimate(engine.clone(), &prune).await.unwrap(), 8);

        let status = run_prune(engine.clone(), &prune).await.unwrap().unwrap();
        assert_eq!(status.run_count, 1);
        assert_eq!(status.last_run_metadata.get("prune_count").unwrap(), "8");
        assert!(render_job_status(&status).contains("deleted in last run: 8"));
        assert_eq!(prune_estimate(engine, &prune).await.unwrap(), 0);
    }

    #[test]
    fn test_explain_request_body() {
        let settings = settings();
        let registry = FieldRegistry::from_definitions(&settings.types);
        let body = explain(
            &settings,
            &registry,
            &query_args(&["open", "-b", "Title=3", "--start", "10", "--limit", "5"]),
        );
        assert_eq!(body["from"], 10);
        assert_eq!(body["size"], 5);
        assert!(body["query"]["bool"]["must"].is_array());
    }

    #[test]
    fn test_request_params_from_flags() {
        let params = request_params(&query_args(&[
            " open ",
            "--params",
            "sort=Title&dir=asc",
            "--start",
            "20",
        ]));
        assert_eq!(params.get("q"), Some("open"));
        assert_eq!(params.get("sort"), Some("Title"));
        assert_eq!(params.get("start"), Some("20"));
        assert_eq!(params.get("limit"), None);
    }

    #[test]
    fn test_show_config_is_toml() {
        let rendered = show_config(&settings()).unwrap();
        assert!(rendered.contains("[engine]"));
        assert!(rendered.contains("name = \"Article\""));
    }
}
