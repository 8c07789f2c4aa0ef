use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::plugin::RetryPolicy;

/// Timing knobs for the reconciliation monitor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MonitorConfig {
    /// How often the idle loop checks whether a sweep is due.
    pub poll_interval_ms: u64,
    /// Delay between the end of one sweep and the next scheduled one.
    pub sweep_interval_ms: u64,
    /// Age of `last_update` after which a series is re-synchronized.
    pub staleness_window_ms: u64,
    /// Minimum gap between two attempts of a failed job.
    pub retry_window_ms: u64,
    /// Pause after each downloaded chapter.
    pub download_cooldown_ms: u64,
    /// Pause after each repackaged chapter.
    pub edit_cooldown_ms: u64,
    /// Upper bound on waiting for the loop to stop at shutdown.
    pub shutdown_grace_ms: u64,
    /// Backoff applied to page downloads.
    pub page_retry: RetryPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000,
            sweep_interval_ms: 60 * 60 * 1000,
            staleness_window_ms: 24 * 60 * 60 * 1000,
            retry_window_ms: 60 * 60 * 1000,
            download_cooldown_ms: 2_000,
            edit_cooldown_ms: 500,
            shutdown_grace_ms: 5_000,
            page_retry: RetryPolicy::default(),
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn staleness_window(&self) -> Duration {
        Duration::from_millis(self.staleness_window_ms)
    }

    pub fn retry_window(&self) -> Duration {
        Duration::from_millis(self.retry_window_ms)
    }

    pub fn download_cooldown(&self) -> Duration {
        Duration::from_millis(self.download_cooldown_ms)
    }

    pub fn edit_cooldown(&self) -> Duration {
        Duration::from_millis(self.edit_cooldown_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Zero cool-downs and no page retries; for tests and dry runs.
    pub fn immediate() -> Self {
        Self {
            poll_interval_ms: 20,
            download_cooldown_ms: 0,
            edit_cooldown_ms: 0,
            page_retry: RetryPolicy::none(),
            ..Self::default()
        }
    }
}
