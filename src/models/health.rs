//! Health snapshot types for operational visibility

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate counters over the sync status table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatistics {
    /// Total status records (one per user ever synced)
    pub total_records: usize,
    /// Rows currently flagged `is_syncing`, fresh or not
    pub active_syncs: usize,
    /// Syncing rows whose heartbeat has gone silent past the timeout
    pub zombie_tasks: usize,
    /// Rows violating the progress/is_syncing invariant
    pub inconsistent_records: usize,
    /// Successful releases within the recent window
    pub recent_completions: usize,
}

/// One zombie candidate, included in the snapshot for diagnosis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZombieSample {
    pub user_id: String,
    pub task_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    /// How long the heartbeat has been silent
    pub silent_secs: i64,
}

/// Point-in-time health report for the sync subsystem
///
/// Built by a read-only pass over the store; never blocks or mutates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// True when no zombies and no invariant violations were found
    pub healthy: bool,
    pub checked_at: DateTime<Utc>,
    pub statistics: HealthStatistics,
    /// Up to a configured number of zombie rows for diagnosis
    pub zombie_samples: Vec<ZombieSample>,
    /// Set when the store could not be read; the snapshot is degraded
    pub error: Option<String>,
}

impl HealthSnapshot {
    /// Degraded snapshot reported when the store itself is unreadable
    pub fn degraded(error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            checked_at: Utc::now(),
            statistics: HealthStatistics::default(),
            zombie_samples: Vec::new(),
            error: Some(error.into()),
        }
    }
}
