//! Read-only progress views for polling callers
//!
//! Pure reads over the store, shaped for a polling HTTP endpoint. No locks
//! are taken and nothing is mutated.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{StatsMap, SyncType};
use crate::storage::SyncStatusStore;

/// Progress of one sync task, as seen by a polling client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncProgress {
    pub task_id: String,
    pub in_progress: bool,
    pub sync_type: SyncType,
    pub progress_percentage: u8,
    pub stats: StatsMap,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Look up progress for `(user_id, task_id)`.
///
/// Returns None when the user has no record or the record belongs to a
/// different task — a poller holding a superseded task id sees None rather
/// than another task's progress.
pub fn get_progress(
    store: &dyn SyncStatusStore,
    user_id: &str,
    task_id: &str,
) -> Result<Option<SyncProgress>> {
    let Some(record) = store.get(user_id)? else {
        return Ok(None);
    };
    if record.task_id.as_deref() != Some(task_id) {
        return Ok(None);
    }
    Ok(Some(SyncProgress {
        task_id: task_id.to_string(),
        in_progress: record.is_syncing,
        sync_type: record.sync_type,
        progress_percentage: record.progress_percentage,
        stats: record.current_stats,
        error_message: record.error_message,
        started_at: record.started_at,
        updated_at: record.updated_at,
    }))
}
