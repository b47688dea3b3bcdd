//! Overlap policy for runs of the same job.
//!
//! A recurring job reschedules itself while it runs, so its next run can
//! become due before the current one finishes (a prune batch slower than
//! the backlog backoff). The guard decides whether the later run is skipped
//! or runs alongside.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// At most one active run per job name
    #[default]
    Skip,

    Concurrent,
}

/// Counts the active runs of one job name.
#[derive(Debug)]
pub struct OverlapGuard {
    active: Arc<AtomicUsize>,
    policy: OverlapPolicy,
}

impl OverlapGuard {
    pub fn new(policy: OverlapPolicy) -> Self {
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            policy,
        }
    }

    /// Claim a run slot. `None` means the run must be skipped; the slot is
    /// released when the returned guard drops.
    pub fn try_acquire(&self) -> Option<RunGuard> {
        let claimed = match self.policy {
            OverlapPolicy::Skip => self
                .active
                .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
            OverlapPolicy::Concurrent => {
                self.active.fetch_add(1, Ordering::AcqRel);
                true
            }
        };
        claimed.then(|| RunGuard {
            active: self.active.clone(),
        })
    }

    pub fn active_runs(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.active_runs() > 0
    }

    pub fn policy(&self) -> OverlapPolicy {
        self.policy
    }
}

/// A claimed run slot. Dropping it, also by unwinding, frees the slot.
#[derive(Debug)]
pub struct RunGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}
