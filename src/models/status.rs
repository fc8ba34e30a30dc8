//! Per-user sync status record and its lifecycle helpers

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form sync statistics (counts of new/updated/error items).
///
/// Kept as a JSON object rather than a fixed struct: the work function
/// decides which counters it reports, and the record just persists them.
pub type StatsMap = serde_json::Map<String, Value>;

/// Kind of sync a task performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncType {
    /// Fetch the whole mailbox from scratch
    Full,
    /// History-delta sync from the last known point
    Incremental,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Full => "full",
            SyncType::Incremental => "incremental",
        }
    }

    /// Parse from the persisted string form. Unknown values fall back to
    /// incremental so an old row never poisons a read path.
    pub fn parse(s: &str) -> Self {
        match s {
            "full" => SyncType::Full,
            _ => SyncType::Incremental,
        }
    }
}

/// How a task ended; drives the final atomic status write.
///
/// The success and failure writes each land the row in a valid terminal
/// state in a single statement: `Completed` sets progress to 100 together
/// with clearing `is_syncing`, `Failed` resets progress to 0 and records
/// the error. Committing 100 while still syncing is never observable.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Completed(StatsMap),
    Failed(String),
}

impl SyncOutcome {
    pub fn error_message(&self) -> Option<&str> {
        match self {
            SyncOutcome::Completed(_) => None,
            SyncOutcome::Failed(msg) => Some(msg),
        }
    }
}

/// Tracks the sync status of one user
///
/// One record per user, keyed by `user_id`. Ownership of an in-flight sync
/// is conferred by committing the admission transaction that sets `task_id`
/// and `is_syncing`; `updated_at` doubles as the heartbeat signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatusRecord {
    /// User this record belongs to (primary key, immutable)
    pub user_id: String,
    /// Identifier of the currently (or most recently) admitted task
    pub task_id: Option<String>,
    /// Whether a sync task currently owns this record
    pub is_syncing: bool,
    /// Kind of sync the current/last task performs
    pub sync_type: SyncType,
    /// When the current/last task was admitted
    pub started_at: Option<DateTime<Utc>>,
    /// Progress in [0, 100]; 100 only once released successfully
    pub progress_percentage: u8,
    /// Latest statistics reported by the task
    pub current_stats: StatsMap,
    /// Error from the last failed task, cleared on re-admission
    pub error_message: Option<String>,
    /// Touched on every mutation; stale values mark zombie tasks
    pub updated_at: DateTime<Utc>,
    /// Set once when the record is first created
    pub created_at: DateTime<Utc>,
}

impl SyncStatusRecord {
    /// Build a freshly admitted record for `user_id`, owned by `task_id`.
    ///
    /// `created_at` is preserved from a previous incarnation of the record
    /// when one exists; everything else is reset to the admitted state.
    pub fn admitted(
        user_id: impl Into<String>,
        task_id: impl Into<String>,
        sync_type: SyncType,
        created_at: Option<DateTime<Utc>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            task_id: Some(task_id.into()),
            is_syncing: true,
            sync_type,
            started_at: Some(now),
            progress_percentage: 0,
            current_stats: StatsMap::new(),
            error_message: None,
            updated_at: now,
            created_at: created_at.unwrap_or(now),
        }
    }

    /// Whether the admitted task is older than `timeout` and no longer
    /// trusted for idempotent reuse, regardless of heartbeat freshness.
    pub fn is_stale(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        match self.started_at {
            Some(started) => now - started >= timeout,
            None => true,
        }
    }

    /// Whether this row is a live, reusable admission as of `now`
    pub fn is_active(&self, stale_timeout: Duration, now: DateTime<Utc>) -> bool {
        self.is_syncing && self.task_id.is_some() && !self.is_stale(stale_timeout, now)
    }

    /// Whether the progress/is_syncing invariant holds: a syncing row sits
    /// in [0, 99], a released row at exactly 0 or 100.
    pub fn progress_is_consistent(&self) -> bool {
        if self.is_syncing {
            self.progress_percentage <= 99
        } else {
            self.progress_percentage == 0 || self.progress_percentage == 100
        }
    }
}
