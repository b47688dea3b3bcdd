//! Bulk buffering and staged reindex against a real index.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use e2e_tests::{article, doc_id, page, RejectingEngine, TestHarness};
use sift_indexing::{
    reindex_staged, DocumentIndexer, IndexAction, IndexingError, MemoryRecordSource,
    NoOpProgressCallback, Record, ReindexConfig,
};
use sift_search::SearchProfile;
use sift_types::Stage;

/// Nothing reaches the index before `end_bulk`; then one batch per type.
#[tokio::test]
async fn test_bulk_session_writes_once_per_type() {
    let harness = TestHarness::new();
    let indexer = &harness.indexer;
    indexer.start_bulk().unwrap();

    for record in [
        article(1, "Bulk one", "body", "A"),
        article(2, "Bulk two", "body", "B"),
        page(3, "Bulk page", None),
    ] {
        let action = indexer.index(&record, Stage::Live).await.unwrap();
        assert_eq!(action, IndexAction::Buffered);
    }
    assert!(indexer.is_bulk_active().unwrap());
    assert_eq!(harness.engine.num_docs(), 0);

    let report = indexer.end_bulk().await.unwrap();
    let mut flushed = report.flushed.clone();
    flushed.sort();
    assert_eq!(
        flushed,
        vec![("Article".to_string(), 2), ("Page".to_string(), 1)]
    );
    assert_eq!(report.total(), 3);
    assert!(!indexer.is_bulk_active().unwrap());
    assert_eq!(harness.engine.num_docs(), 3);

    let page = harness
        .search(&SearchProfile::default(), "q=bulk", Stage::Live)
        .await
        .unwrap();
    assert_eq!(page.result.total_count, 3);
}

#[tokio::test]
async fn test_second_bulk_session_rejected() {
    let harness = TestHarness::new();
    harness.indexer.start_bulk().unwrap();
    assert!(matches!(
        harness.indexer.start_bulk(),
        Err(IndexingError::BulkSessionActive)
    ));
    harness.indexer.end_bulk().await.unwrap();
    // closing without a session is a no-op
    assert_eq!(harness.indexer.end_bulk().await.unwrap().total(), 0);
}

/// A rejected type fails the flush; the other types stay written.
#[tokio::test]
async fn test_partial_bulk_failure_keeps_flushed_types() {
    let harness = TestHarness::new();
    let engine = Arc::new(RejectingEngine::new(harness.engine(), ["Page"]));
    let indexer = DocumentIndexer::new(engine).with_registry(harness.registry.clone());

    indexer.start_bulk().unwrap();
    indexer
        .index(&article(1, "Survivor", "body", "A"), Stage::Live)
        .await
        .unwrap();
    indexer
        .index(&page(2, "Casualty", None), Stage::Live)
        .await
        .unwrap();

    match indexer.end_bulk().await {
        Err(IndexingError::BulkIndexPartialFailure {
            failed_types,
            flushed_types,
            first_error,
        }) => {
            assert_eq!(failed_types, vec!["Page".to_string()]);
            assert_eq!(flushed_types, vec!["Article".to_string()]);
            assert!(first_error.contains("mapper_parsing_exception"));
        }
        other => panic!("expected partial failure, got {other:?}"),
    }

    let page = harness
        .search(&SearchProfile::default(), "q=survivor", Stage::Live)
        .await
        .unwrap();
    assert_eq!(page.ids(), vec![doc_id("Article", 1, Stage::Live)]);
    assert_eq!(harness.engine.num_docs(), 1);
}

/// Reindex writes each versioned type once per stage and unversioned types once.
#[tokio::test]
async fn test_staged_reindex_fills_both_stages() {
    let harness = TestHarness::new();
    let source = MemoryRecordSource::from_records(vec![
        article(1, "Atlas", "maps", "A"),
        Record::new("Article", 2)
            .with_field("Title", "Atlas draft")
            .with_field("Category", "A"),
        page(3, "Atlas root", None),
        page(4, "Atlas child", Some(3)),
        Record::new("File", 5)
            .with_field("Title", "Atlas scan")
            .unversioned(),
    ]);

    let config = ReindexConfig::default().with_batch_size(2);
    let report = reindex_staged(
        &harness.indexer,
        &source,
        &harness.registry,
        &config,
        &NoOpProgressCallback,
    )
    .await
    .unwrap();

    // Article: 2 draft + 1 live, Page: 2 draft + 2 live, File: 1
    assert_eq!(report.progress.indexed, 8);
    assert_eq!(report.failures(), 0);
    assert!(report.progress.completed);
    assert_eq!(harness.engine.num_docs(), 8);

    let profile = SearchProfile::default().with_filter_type("Page");
    let within = harness
        .search(&profile, "q=atlas&within=3", Stage::Draft)
        .await
        .unwrap();
    assert_eq!(within.ids(), vec![doc_id("Page", 4, Stage::Draft)]);

    let live = harness
        .search(&SearchProfile::default(), "q=atlas", Stage::Live)
        .await
        .unwrap();
    assert_eq!(live.result.total_count, 4);
}

#[tokio::test]
async fn test_reindex_restricted_to_types() {
    let harness = TestHarness::new();
    let source = MemoryRecordSource::from_records(vec![
        article(1, "Atlas", "maps", "A"),
        page(2, "Atlas root", None),
    ]);

    let config = ReindexConfig::default().with_types(vec!["Page".into(), "Unknown".into()]);
    let report = reindex_staged(
        &harness.indexer,
        &source,
        &harness.registry,
        &config,
        &NoOpProgressCallback,
    )
    .await
    .unwrap();

    assert_eq!(report.progress.indexed, 2);
    assert_eq!(report.progress.skipped_types, vec!["Unknown".to_string()]);
    assert_eq!(harness.engine.num_docs(), 2);
}
