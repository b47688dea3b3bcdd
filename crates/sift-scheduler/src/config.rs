//! Scheduler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::overlap::OverlapPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds active runs get to finish once shutdown is signalled
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// What happens when a job comes due while its previous run is active
    #[serde(default)]
    pub overlap: OverlapPolicy,
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            overlap: OverlapPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_shutdown_timeout(mut self, secs: u64) -> Self {
        self.shutdown_timeout_secs = secs;
        self
    }

    pub fn with_overlap(mut self, overlap: OverlapPolicy) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_skip_overlapping_runs() {
        let config = SchedulerConfig::default();
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
        assert_eq!(config.overlap, OverlapPolicy::Skip);

        let parsed: SchedulerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_parse_and_builders() {
        let parsed: SchedulerConfig =
            serde_json::from_str(r#"{"shutdown_timeout_secs": 5, "overlap": "concurrent"}"#)
                .unwrap();
        assert_eq!(
            parsed,
            SchedulerConfig::default()
                .with_shutdown_timeout(5)
                .with_overlap(OverlapPolicy::Concurrent)
        );
    }
}
