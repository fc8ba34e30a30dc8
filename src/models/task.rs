//! Read-only view of a user's admitted task

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{StatsMap, SyncStatusRecord, SyncType};

/// Snapshot of the task currently recorded for a user
///
/// Produced by the lock-free read path so a caller can decide whether a
/// `start_sync` response means "reused existing" or "created new" without
/// touching the admission lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: String,
    pub sync_type: SyncType,
    /// True when the task is syncing and within the stale-admission window
    pub is_active: bool,
    /// True when the row still claims to be syncing but the admission has
    /// outlived the stale timeout (left for the reclaimer to clean up)
    pub expired: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub progress_percentage: u8,
    pub stats: StatsMap,
}

impl TaskInfo {
    /// Classify `record` as of `now` against the stale-admission timeout.
    ///
    /// Returns None when the record carries no task at all.
    pub fn from_record(
        record: &SyncStatusRecord,
        stale_timeout: Duration,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        let task_id = record.task_id.clone()?;
        let active = record.is_active(stale_timeout, now);
        Some(Self {
            task_id,
            sync_type: record.sync_type,
            is_active: active,
            expired: record.is_syncing && !active,
            started_at: record.started_at,
            progress_percentage: record.progress_percentage,
            stats: record.current_stats.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_task() {
        let record = SyncStatusRecord::admitted("u1", "t1", SyncType::Full, None);
        let info = TaskInfo::from_record(&record, Duration::minutes(30), Utc::now()).unwrap();
        assert!(info.is_active);
        assert!(!info.expired);
        assert_eq!(info.task_id, "t1");
    }

    #[test]
    fn test_expired_task() {
        let mut record = SyncStatusRecord::admitted("u1", "t1", SyncType::Full, None);
        record.started_at = Some(Utc::now() - Duration::hours(1));
        let info = TaskInfo::from_record(&record, Duration::minutes(30), Utc::now()).unwrap();
        assert!(!info.is_active);
        assert!(info.expired);
    }

    #[test]
    fn test_released_task_is_neither_active_nor_expired() {
        let mut record = SyncStatusRecord::admitted("u1", "t1", SyncType::Full, None);
        record.is_syncing = false;
        record.progress_percentage = 100;
        let info = TaskInfo::from_record(&record, Duration::minutes(30), Utc::now()).unwrap();
        assert!(!info.is_active);
        assert!(!info.expired);
    }

    #[test]
    fn test_record_without_task() {
        let mut record = SyncStatusRecord::admitted("u1", "t1", SyncType::Full, None);
        record.task_id = None;
        assert!(TaskInfo::from_record(&record, Duration::minutes(30), Utc::now()).is_none());
    }
}
