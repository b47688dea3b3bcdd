//! Stale pruning through the scheduler: the job drains a backlog in
//! batches, rescheduling itself until fewer than a batch remain.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use pretty_assertions::assert_eq;

use e2e_tests::{stale_documents, TestHarness};
use sift_scheduler::{
    JobQueue, JobResult, SchedulerConfig, SchedulerService, StalePruneConfig, StalePruneJob,
};
use sift_search::SearchEngine;

async fn seed(harness: &TestHarness, type_name: &str, stale: u64, fresh: u64) {
    let old = Utc::now() - TimeDelta::days(90);
    let mut docs = stale_documents(type_name, 1..=stale, old);
    docs.extend(stale_documents(
        type_name,
        100_001..=100_000 + fresh,
        Utc::now(),
    ));
    harness
        .engine
        .index_documents(type_name, &docs)
        .await
        .unwrap();
}

async fn run_to_idle(scheduler: &SchedulerService) {
    scheduler.start().unwrap();
    tokio::time::timeout(Duration::from_secs(30), scheduler.wait_idle())
        .await
        .expect("scheduler did not drain");
    scheduler.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_backlog_drains_in_three_runs() {
    let harness = TestHarness::new();
    seed(&harness, "Article", 1200, 7).await;
    assert_eq!(harness.engine.num_docs(), 1207);

    let config = StalePruneConfig::default()
        .with_older_than_days(30)
        .with_batch_size(500)
        .with_backlog_backoff(Duration::ZERO);
    let job = Arc::new(StalePruneJob::new(harness.engine(), config));
    assert_eq!(job.estimate().await.unwrap(), 1200);

    let scheduler = SchedulerService::new(SchedulerConfig::default());
    scheduler.schedule(job.clone(), Utc::now()).unwrap();
    run_to_idle(&scheduler).await;

    let status = scheduler.registry().get_status("stale-prune").unwrap();
    assert_eq!(status.run_count, 3);
    assert_eq!(status.error_count, 0);
    assert_eq!(status.last_result, Some(JobResult::Success));
    // the short final batch ends the chain
    assert_eq!(status.last_run_metadata.get("prune_count").unwrap(), "200");
    assert_eq!(status.next_run, None);

    assert_eq!(harness.engine.num_docs(), 7);
    assert_eq!(job.estimate().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_filtered_prune_leaves_other_types() {
    let harness = TestHarness::new();
    seed(&harness, "Article", 40, 0).await;
    seed(&harness, "Page", 30, 2).await;

    let config = StalePruneConfig::default().with_filter("ClassName:Page");
    let job = Arc::new(StalePruneJob::new(harness.engine(), config));

    let scheduler = SchedulerService::new(SchedulerConfig::default());
    scheduler.schedule(job, Utc::now()).unwrap();
    run_to_idle(&scheduler).await;

    let status = scheduler
        .registry()
        .get_status("stale-prune:ClassName:Page")
        .unwrap();
    assert_eq!(status.run_count, 1);
    assert_eq!(status.last_run_metadata.get("prune_count").unwrap(), "30");
    assert_eq!(harness.engine.num_docs(), 42);
}

/// Nothing stale: one run, nothing deleted, no reschedule.
#[tokio::test(flavor = "multi_thread")]
async fn test_prune_with_nothing_stale() {
    let harness = TestHarness::new();
    seed(&harness, "Article", 0, 5).await;

    let job = Arc::new(StalePruneJob::new(
        harness.engine(),
        StalePruneConfig::default(),
    ));
    let scheduler = SchedulerService::new(SchedulerConfig::default());
    scheduler.schedule(job, Utc::now()).unwrap();
    run_to_idle(&scheduler).await;

    let status = scheduler.registry().get_status("stale-prune").unwrap();
    assert_eq!(status.run_count, 1);
    assert_eq!(status.last_run_metadata.get("prune_count").unwrap(), "0");
    assert_eq!(scheduler.pending(), 0);
    assert_eq!(harness.engine.num_docs(), 5);
}
