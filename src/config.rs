//! Timing configuration for admission, heartbeat and reclamation
//!
//! All knobs are plain durations so tests can shrink them to milliseconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunable timings for the sync status subsystem
///
/// The defaults encode the production contract: a heartbeat every 15s, a
/// zombie cutoff of 60s (four missed pulses), and a 30-minute ceiling on
/// trusting an admitted task for idempotent reuse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Ceiling on reusing an admitted task, independent of heartbeats.
    /// Protects against a task whose heartbeat loop itself died without
    /// ever reaching the release path.
    pub stale_admission_timeout: Duration,
    /// Period of the executor's liveness pulse
    pub heartbeat_interval: Duration,
    /// Silence after which a syncing row counts as a zombie; must be at
    /// least twice `heartbeat_interval` to tolerate a missed pulse
    pub heartbeat_timeout: Duration,
    /// Period of the background reclaimer sweep
    pub reclaim_interval: Duration,
    /// Window for counting recent successful completions in health reports
    pub recent_completion_window: Duration,
    /// Maximum zombie rows embedded in a health snapshot
    pub zombie_sample_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            stale_admission_timeout: Duration::from_secs(30 * 60),
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(60),
            reclaim_interval: Duration::from_secs(2 * 60),
            recent_completion_window: Duration::from_secs(60 * 60),
            zombie_sample_limit: 10,
        }
    }
}

impl SyncConfig {
    /// Config with all timings compressed for tests
    pub fn fast() -> Self {
        Self {
            stale_admission_timeout: Duration::from_secs(2),
            heartbeat_interval: Duration::from_millis(20),
            heartbeat_timeout: Duration::from_millis(100),
            reclaim_interval: Duration::from_millis(50),
            recent_completion_window: Duration::from_secs(60),
            zombie_sample_limit: 10,
        }
    }

    /// `stale_admission_timeout` as a chrono duration for timestamp math
    pub fn stale_admission_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.stale_admission_timeout)
            .unwrap_or_else(|_| chrono::Duration::minutes(30))
    }

    /// `heartbeat_timeout` as a chrono duration for timestamp math
    pub fn heartbeat_timeout_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.heartbeat_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(60))
    }

    /// `recent_completion_window` as a chrono duration for timestamp math
    pub fn recent_window_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.recent_completion_window)
            .unwrap_or_else(|_| chrono::Duration::hours(1))
    }
}
