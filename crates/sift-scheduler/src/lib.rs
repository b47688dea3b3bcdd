//! Run-at job scheduling for sift.
//!
//! Jobs are scheduled for a point in time on a [`JobQueue`]; recurring jobs
//! reschedule themselves at the end of each run. [`SchedulerService`] runs
//! the queue on tokio with graceful shutdown, and [`MemoryJobQueue`] lets a
//! caller step through runs by hand.
//!
//! # Features
//!
//! - Run-at scheduling through the [`JobQueue`] contract
//! - Graceful shutdown via `CancellationToken`
//! - Job status observability via [`JobRegistry`]
//! - Overlap policy (skip/concurrent) per job name
//! - [`StalePruneJob`], a self-throttling prune of old documents
//!
//! # Example
//!
//! ```ignore
//! use sift_scheduler::{JobQueue, SchedulerConfig, SchedulerService, StalePruneConfig, StalePruneJob};
//!
//! let scheduler = SchedulerService::new(SchedulerConfig::default());
//! let job = StalePruneJob::new(engine, StalePruneConfig::default().with_repeat(one_day));
//! scheduler.schedule(Arc::new(job), chrono::Utc::now())?;
//!
//! scheduler.start()?;
//! let status = scheduler.registry().get_status("stale-prune");
//! ```

mod config;
mod error;
mod job;
mod overlap;
mod prune;
mod registry;
mod scheduler;

pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use job::{JobQueue, MemoryJobQueue, QueuedJob, ScheduledJob};
pub use overlap::{OverlapGuard, OverlapPolicy, RunGuard};
pub use prune::{PruneBatch, StalePruneConfig, StalePruneJob};
pub use registry::{JobOutput, JobRegistry, JobResult, JobStatus};
pub use scheduler::SchedulerService;
