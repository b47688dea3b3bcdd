//! In-process runner for scheduled jobs.
//!
//! Jobs wait in a run-at queue; a dispatcher task starts each when it is
//! due. Runs of the same job name never overlap. Shutdown cancels the
//! token handed to every job and waits for running jobs up to the
//! configured timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::job::{JobQueue, QueuedJob, ScheduledJob};
use crate::overlap::{OverlapGuard, OverlapPolicy};
use crate::registry::{JobRegistry, JobResult};
use crate::{SchedulerConfig, SchedulerError};

struct Shared {
    queue: Mutex<Vec<QueuedJob>>,
    guards: Mutex<HashMap<String, Arc<OverlapGuard>>>,
    registry: Arc<JobRegistry>,
    overlap: OverlapPolicy,
    active: AtomicUsize,
    /// Wakes the dispatcher and idle waiters on queue or run changes
    changed: Notify,
    shutdown_token: CancellationToken,
}

impl Shared {
    fn lock_queue(&self) -> Result<MutexGuard<'_, Vec<QueuedJob>>, SchedulerError> {
        self.queue
            .lock()
            .map_err(|e| SchedulerError::QueueLocked(e.to_string()))
    }

    fn guard_for(&self, job_name: &str) -> Result<Arc<OverlapGuard>, SchedulerError> {
        let mut guards = self
            .guards
            .lock()
            .map_err(|e| SchedulerError::QueueLocked(e.to_string()))?;
        Ok(guards
            .entry(job_name.to_string())
            .or_insert_with(|| Arc::new(OverlapGuard::new(self.overlap)))
            .clone())
    }

    fn pending(&self) -> usize {
        self.lock_queue().map(|q| q.len()).unwrap_or_default()
    }

    fn is_idle(&self) -> bool {
        self.pending() == 0 && self.active.load(Ordering::SeqCst) == 0
    }

    /// Earliest pending run of a job name.
    fn next_run_of(queue: &[QueuedJob], job_name: &str) -> Option<DateTime<Utc>> {
        queue
            .iter()
            .filter(|e| e.job.name() == job_name)
            .map(|e| e.run_at)
            .min()
    }

    fn next_due(&self) -> Result<Option<DateTime<Utc>>, SchedulerError> {
        Ok(self.lock_queue()?.iter().map(|e| e.run_at).min())
    }

    fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<QueuedJob>, SchedulerError> {
        let mut queue = self.lock_queue()?;
        let (mut due, rest): (Vec<QueuedJob>, Vec<QueuedJob>) =
            queue.drain(..).partition(|e| e.run_at <= now);
        *queue = rest;
        // counted while the queue lock is held; idle checks see it queued or active
        self.active.fetch_add(due.len(), Ordering::SeqCst);
        due.sort_by_key(|e| e.run_at);
        for entry in &due {
            self.registry
                .set_next_run(entry.job.name(), Self::next_run_of(&queue, entry.job.name()));
        }
        Ok(due)
    }
}

impl JobQueue for Shared {
    fn schedule(
        &self,
        job: Arc<dyn ScheduledJob>,
        run_at: DateTime<Utc>,
    ) -> Result<Uuid, SchedulerError> {
        let id = Uuid::new_v4();
        let name = job.name().to_string();
        self.registry.register(&name, &job.title());
        {
            let mut queue = self.lock_queue()?;
            queue.push(QueuedJob { id, job, run_at });
            self.registry
                .set_next_run(&name, Self::next_run_of(&queue, &name));
        }
        debug!(job = %name, run_at = %run_at, id = %id, "Job scheduled");
        self.changed.notify_waiters();
        Ok(id)
    }
}

/// Run-at scheduler backed by tokio tasks.
pub struct SchedulerService {
    shared: Arc<Shared>,
    config: SchedulerConfig,
    is_running: AtomicBool,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl SchedulerService {
    /// Create a scheduler. Nothing runs until [`SchedulerService::start`].
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(Vec::new()),
                guards: Mutex::new(HashMap::new()),
                registry: Arc::new(JobRegistry::new()),
                overlap: config.overlap,
                active: AtomicUsize::new(0),
                changed: Notify::new(),
                shutdown_token: CancellationToken::new(),
            }),
            config,
            is_running: AtomicBool::new(false),
            dispatcher: Mutex::new(None),
        }
    }

    /// Start dispatching due jobs.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::AlreadyRunning` if the scheduler is already started.
    pub fn start(&self) -> Result<(), SchedulerError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }
        let handle = tokio::spawn(dispatch(self.shared.clone()));
        if let Ok(mut dispatcher) = self.dispatcher.lock() {
            *dispatcher = Some(handle);
        }
        info!("Scheduler started");
        Ok(())
    }

    /// Signal jobs to stop and wait for running jobs up to the shutdown timeout.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::NotRunning` if the scheduler is not started.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(SchedulerError::NotRunning);
        }
        info!("Initiating scheduler shutdown");
        self.shared.shutdown_token.cancel();
        self.shared.changed.notify_waiters();

        let handle = self.dispatcher.lock().ok().and_then(|mut d| d.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Dispatcher task ended abnormally");
            }
        }

        let shared = self.shared.clone();
        let drained = tokio::time::timeout(self.config.shutdown_timeout(), async move {
            loop {
                let changed = shared.changed.notified();
                if shared.active.load(Ordering::SeqCst) == 0 {
                    return;
                }
                changed.await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                active = self.shared.active.load(Ordering::SeqCst),
                "Jobs still running after shutdown timeout"
            );
        }

        self.is_running.store(false, Ordering::SeqCst);
        info!("Scheduler shutdown complete");
        Ok(())
    }

    /// Wait until no job is pending or running.
    pub async fn wait_idle(&self) {
        loop {
            let changed = self.shared.changed.notified();
            if self.shared.is_idle() {
                return;
            }
            changed.await;
        }
    }

    /// Cancelled on shutdown; jobs receive child tokens of it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shared.shutdown_token.clone()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> Arc<JobRegistry> {
        self.shared.registry.clone()
    }

    /// Number of scheduled runs not yet started.
    pub fn pending(&self) -> usize {
        self.shared.pending()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }
}

impl JobQueue for SchedulerService {
    fn schedule(
        &self,
        job: Arc<dyn ScheduledJob>,
        run_at: DateTime<Utc>,
    ) -> Result<Uuid, SchedulerError> {
        self.shared.schedule(job, run_at)
    }
}

async fn dispatch(shared: Arc<Shared>) {
    loop {
        let changed = shared.changed.notified();
        if shared.shutdown_token.is_cancelled() {
            break;
        }
        let next = match shared.next_due() {
            Ok(next) => next,
            Err(e) => {
                error!(error = %e, "Scheduler queue unavailable");
                break;
            }
        };
        let wait = match next {
            None => None,
            Some(at) => Some((at - Utc::now()).to_std().unwrap_or(Duration::ZERO)),
        };

        match wait {
            Some(wait) if wait.is_zero() => {
                match shared.take_due(Utc::now()) {
                    Ok(due) => {
                        for entry in due {
                            spawn_run(shared.clone(), entry);
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Scheduler queue unavailable");
                        break;
                    }
                }
            }
            Some(wait) => {
                tokio::select! {
                    _ = shared.shutdown_token.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                    _ = changed => {}
                }
            }
            None => {
                tokio::select! {
                    _ = shared.shutdown_token.cancelled() => break,
                    _ = changed => {}
                }
            }
        }
    }
    debug!("Scheduler dispatcher stopped");
}

/// Run a due entry; it was already counted active by `take_due`.
fn spawn_run(shared: Arc<Shared>, entry: QueuedJob) {
    tokio::spawn(async move {
        let name = entry.job.name().to_string();
        run_entry(&shared, entry).await;
        shared.active.fetch_sub(1, Ordering::SeqCst);
        debug!(job = %name, "Job task finished");
        shared.changed.notify_waiters();
    });
}

async fn run_entry(shared: &Arc<Shared>, entry: QueuedJob) {
    let name = entry.job.name().to_string();
    let guard = match shared.guard_for(&name) {
        Ok(guard) => guard,
        Err(e) => {
            error!(job = %name, error = %e, "Cannot run job");
            return;
        }
    };
    let Some(_run) = guard.try_acquire() else {
        info!(job = %name, "Previous run still active, skipping");
        shared.registry.record_skipped(&name, "previous run active");
        return;
    };

    shared.registry.record_start(&name);
    info!(job = %name, id = %entry.id, "Job started");
    let start = Instant::now();
    let result = entry
        .job
        .clone()
        .run(shared.as_ref(), shared.shutdown_token.child_token())
        .await;
    let duration_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(output) => {
            info!(job = %name, duration_ms, "Job completed");
            shared.registry.record_complete_with_metadata(
                &name,
                JobResult::Success,
                duration_ms,
                output.metadata,
            );
        }
        Err(e) => {
            error!(job = %name, duration_ms, error = %e, "Job failed");
            shared
                .registry
                .record_complete(&name, JobResult::Failed(e.to_string()), duration_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::JobOutput;
    use async_trait::async_trait;

    struct Repeating {
        runs: AtomicUsize,
        times: usize,
        fail_on: Option<usize>,
    }

    impl Repeating {
        fn new(times: usize) -> Arc<Self> {
            Arc::new(Self {
                runs: AtomicUsize::new(0),
                times,
                fail_on: None,
            })
        }
    }

    #[async_trait]
    impl ScheduledJob for Repeating {
        fn name(&self) -> &str {
            "repeating"
        }

        fn title(&self) -> String {
            "Repeat a few times".into()
        }

        async fn run(
            self: Arc<Self>,
            queue: &dyn JobQueue,
            _cancel: CancellationToken,
        ) -> Result<JobOutput, SchedulerError> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if run < self.times {
                queue.schedule(self.clone(), Utc::now())?;
            }
            if self.fail_on == Some(run) {
                return Err(SchedulerError::Job("boom".into()));
            }
            Ok(JobOutput::new().with_metadata("run", run.to_string()))
        }
    }

    /// Runs until cancelled.
    struct Blocking;

    #[async_trait]
    impl ScheduledJob for Blocking {
        fn name(&self) -> &str {
            "blocking"
        }

        async fn run(
            self: Arc<Self>,
            _queue: &dyn JobQueue,
            cancel: CancellationToken,
        ) -> Result<JobOutput, SchedulerError> {
            cancel.cancelled().await;
            Ok(JobOutput::new())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_stop() {
        let scheduler = SchedulerService::new(SchedulerConfig::default().with_shutdown_timeout(1));
        assert!(!scheduler.is_running());

        scheduler.start().unwrap();
        assert!(matches!(scheduler.start(), Err(SchedulerError::AlreadyRunning)));

        let token = scheduler.shutdown_token();
        scheduler.shutdown().await.unwrap();
        assert!(token.is_cancelled());
        assert!(!scheduler.is_running());
        assert!(matches!(
            scheduler.shutdown().await,
            Err(SchedulerError::NotRunning)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_self_rescheduling_job_runs_until_done() {
        let scheduler = SchedulerService::new(SchedulerConfig::default());
        let job = Repeating::new(3);
        scheduler.schedule(job.clone(), Utc::now()).unwrap();
        scheduler.start().unwrap();

        tokio::time::timeout(Duration::from_secs(5), scheduler.wait_idle())
            .await
            .unwrap();

        assert_eq!(job.runs.load(Ordering::SeqCst), 3);
        let status = scheduler.registry().get_status("repeating").unwrap();
        assert_eq!(status.title, "Repeat a few times");
        assert_eq!(status.run_count, 3);
        assert_eq!(status.last_run_metadata.get("run").unwrap(), "3");
        assert_eq!(status.next_run, None);
        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_run_recorded_and_chain_continues() {
        let scheduler = SchedulerService::new(SchedulerConfig::default());
        let job = Arc::new(Repeating {
            runs: AtomicUsize::new(0),
            times: 2,
            fail_on: Some(1),
        });
        scheduler.schedule(job.clone(), Utc::now()).unwrap();
        scheduler.start().unwrap();
        tokio::time::timeout(Duration::from_secs(5), scheduler.wait_idle())
            .await
            .unwrap();

        let status = scheduler.registry().get_status("repeating").unwrap();
        assert_eq!(status.run_count, 2);
        assert_eq!(status.error_count, 1);
        assert_eq!(status.last_result, Some(JobResult::Success));
        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_future_job_stays_pending() {
        let scheduler = SchedulerService::new(SchedulerConfig::default().with_shutdown_timeout(1));
        let later = Utc::now() + chrono::Duration::hours(1);
        scheduler.schedule(Repeating::new(1), later).unwrap();
        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(scheduler.pending(), 1);
        let status = scheduler.registry().get_status("repeating").unwrap();
        assert_eq!(status.next_run, Some(later));
        assert_eq!(status.run_count, 0);
        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_overlapping_run_skipped_and_shutdown_cancels() {
        let scheduler = SchedulerService::new(SchedulerConfig::default().with_shutdown_timeout(5));
        scheduler.start().unwrap();
        scheduler.schedule(Arc::new(Blocking), Utc::now()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.schedule(Arc::new(Blocking), Utc::now()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let status = scheduler.registry().get_status("blocking").unwrap();
        assert!(status.is_running);
        assert_eq!(
            status.last_result,
            Some(JobResult::Skipped("previous run active".into()))
        );

        scheduler.shutdown().await.unwrap();
        let status = scheduler.registry().get_status("blocking").unwrap();
        assert_eq!(status.last_result, Some(JobResult::Success));
    }
}
