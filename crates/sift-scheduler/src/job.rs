//! Jobs and the queue they are scheduled on.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::SchedulerError;
use crate::registry::JobOutput;

/// A unit of work run by a [`JobQueue`] runner.
///
/// Recurring jobs reschedule themselves on the queue they were run from.
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    /// Stable name; runs of one name never overlap.
    fn name(&self) -> &str;

    fn title(&self) -> String {
        self.name().to_string()
    }

    async fn run(
        self: Arc<Self>,
        queue: &dyn JobQueue,
        cancel: CancellationToken,
    ) -> Result<JobOutput, SchedulerError>;
}

/// Accepts a job to run at a given time.
pub trait JobQueue: Send + Sync {
    fn schedule(
        &self,
        job: Arc<dyn ScheduledJob>,
        run_at: DateTime<Utc>,
    ) -> Result<Uuid, SchedulerError>;
}

/// A scheduled run.
#[derive(Clone)]
pub struct QueuedJob {
    pub id: Uuid,
    pub job: Arc<dyn ScheduledJob>,
    pub run_at: DateTime<Utc>,
}

impl std::fmt::Debug for QueuedJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedJob")
            .field("id", &self.id)
            .field("job", &self.job.name())
            .field("run_at", &self.run_at)
            .finish()
    }
}

/// Queue that only records schedule calls. Runs happen when the caller
/// pops and runs entries, which makes rescheduling observable in tests and
/// one-shot tools.
#[derive(Default)]
pub struct MemoryJobQueue {
    entries: Mutex<Vec<QueuedJob>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<QueuedJob>>, SchedulerError> {
        self.entries
            .lock()
            .map_err(|e| SchedulerError::QueueLocked(e.to_string()))
    }

    /// Pending entries, earliest first.
    pub fn pending(&self) -> Result<Vec<QueuedJob>, SchedulerError> {
        let mut entries = self.lock()?.clone();
        entries.sort_by_key(|e| e.run_at);
        Ok(entries)
    }

    pub fn len(&self) -> usize {
        self.lock().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return the earliest entry, regardless of its run time.
    pub fn pop_next(&self) -> Result<Option<QueuedJob>, SchedulerError> {
        let mut entries = self.lock()?;
        let next = entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.run_at)
            .map(|(i, _)| i);
        Ok(next.map(|i| entries.remove(i)))
    }

    /// Run the earliest entry now. `None` when the queue is empty.
    pub async fn run_next(
        &self,
        cancel: CancellationToken,
    ) -> Result<Option<(QueuedJob, Result<JobOutput, SchedulerError>)>, SchedulerError> {
        let Some(entry) = self.pop_next()? else {
            return Ok(None);
        };
        let result = entry.job.clone().run(self, cancel).await;
        Ok(Some((entry, result)))
    }
}

impl JobQueue for MemoryJobQueue {
    fn schedule(
        &self,
        job: Arc<dyn ScheduledJob>,
        run_at: DateTime<Utc>,
    ) -> Result<Uuid, SchedulerError> {
        let id = Uuid::new_v4();
        self.lock()?.push(QueuedJob { id, job, run_at });
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reschedules itself until it has run `times` times.
    struct Countdown {
        runs: AtomicUsize,
        times: usize,
    }

    #[async_trait]
    impl ScheduledJob for Countdown {
        fn name(&self) -> &str {
            "countdown"
        }

        async fn run(
            self: Arc<Self>,
            queue: &dyn JobQueue,
            _cancel: CancellationToken,
        ) -> Result<JobOutput, SchedulerError> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if run < self.times {
                queue.schedule(self.clone(), Utc::now() + Duration::seconds(run as i64))?;
            }
            Ok(JobOutput::new().with_metadata("run", run.to_string()))
        }
    }

    #[tokio::test]
    async fn test_run_next_follows_reschedules() {
        let queue = MemoryJobQueue::new();
        let job = Arc::new(Countdown {
            runs: AtomicUsize::new(0),
            times: 3,
        });
        queue.schedule(job.clone(), Utc::now()).unwrap();

        let mut runs = Vec::new();
        while let Some((entry, result)) = queue.run_next(CancellationToken::new()).await.unwrap() {
            assert_eq!(entry.job.name(), "countdown");
            runs.push(result.unwrap().get("run").unwrap().to_string());
        }
        assert_eq!(runs, vec!["1", "2", "3"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_next_earliest_first() {
        let queue = MemoryJobQueue::new();
        let job = Arc::new(Countdown {
            runs: AtomicUsize::new(0),
            times: 1,
        });
        let now = Utc::now();
        queue.schedule(job.clone(), now + Duration::hours(2)).unwrap();
        let early = queue.schedule(job.clone(), now).unwrap();

        assert_eq!(queue.pending().unwrap()[0].id, early);
        assert_eq!(queue.pop_next().unwrap().unwrap().id, early);
        assert_eq!(queue.len(), 1);
    }
}
