//! Storage trait definitions

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{HealthStatistics, StatsMap, SyncOutcome, SyncStatusRecord};

/// Exclusive admission section over one user's status row
///
/// Obtained from [`SyncStatusStore::begin_admission`]; holds the backend's
/// row lock (or its emulation) until committed or dropped. Dropping the
/// guard without committing rolls every staged write back, so an admission
/// that fails mid-flight leaves the row untouched.
pub trait AdmissionGuard {
    /// Read the user's current record under the lock
    fn current(&mut self) -> Result<Option<SyncStatusRecord>>;

    /// Stage an insert-or-update of the record within the locked section
    fn upsert(&mut self, record: &SyncStatusRecord) -> Result<()>;

    /// Commit the section, publishing staged writes and releasing the lock
    fn commit(self: Box<Self>) -> Result<()>;
}

/// Trait for sync status storage operations
///
/// Everything outside `begin_admission` autocommits: heartbeat and progress
/// writes must never hold a long-lived transaction, and release must land
/// even when the writer only knows the task id.
pub trait SyncStatusStore: Send + Sync {
    /// Open the exclusive admission section for `user_id`.
    ///
    /// Blocks a concurrent admission for the same user until the returned
    /// guard is committed or dropped. The critical section is expected to
    /// stay short: read, decide, conditionally write, commit.
    fn begin_admission<'a>(&'a self, user_id: &str) -> Result<Box<dyn AdmissionGuard + 'a>>;

    /// Read a record without locking
    fn get(&self, user_id: &str) -> Result<Option<SyncStatusRecord>>;

    /// Insert or update a record outside the admission path (seeding,
    /// operator repair, tests)
    fn upsert(&self, record: &SyncStatusRecord) -> Result<()>;

    /// Finalize the row owned by `task_id`.
    ///
    /// `Completed` sets `is_syncing=false, progress=100` and stores the
    /// final stats; `Failed` sets `is_syncing=false, progress=0` and the
    /// error message. Matches by task id, not user: by release time the
    /// caller may only know the task. Returns false (not an error) when no
    /// row matches — the task may already have been reclaimed.
    fn release(&self, task_id: &str, outcome: &SyncOutcome) -> Result<bool>;

    /// Touch `updated_at` for the row owned by `task_id`.
    ///
    /// Returns false when no syncing row carries the task id anymore; the
    /// heartbeat loop treats that as an external cancellation signal.
    fn touch_heartbeat(&self, task_id: &str) -> Result<bool>;

    /// Write in-flight progress for the row owned by `task_id`.
    ///
    /// `percentage` must stay within [0, 99] while the row is syncing;
    /// 100 is only reachable through [`release`](Self::release). Returns
    /// whether a row was affected.
    fn update_progress(&self, task_id: &str, percentage: u8, stats: &StatsMap) -> Result<bool>;

    /// List syncing rows whose heartbeat predates `cutoff`, oldest first,
    /// capped at `limit` if given
    fn find_zombies(
        &self,
        cutoff: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<SyncStatusRecord>>;

    /// Aggregate counters for health reporting; read-only
    fn statistics(
        &self,
        zombie_cutoff: DateTime<Utc>,
        recent_cutoff: DateTime<Utc>,
    ) -> Result<HealthStatistics>;
}
