//! Idempotent sync admission
//!
//! Single entry point guaranteeing at-most-one live task per user. The
//! store's locked admission section serializes concurrent attempts for the
//! same user; the `is_syncing` check inside it decides reuse versus new.

use anyhow::Result;
use chrono::Utc;
use log::{debug, info};

use crate::config::SyncConfig;
use crate::error::AdmissionError;
use crate::models::{SyncStatusRecord, SyncType, TaskInfo};
use crate::storage::SyncStatusStore;

/// Result of a `start_sync` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// A fresh task was admitted and now owns the status row
    Created(String),
    /// A task admitted earlier is still live; its id is returned again
    Reused(String),
}

impl Admission {
    pub fn task_id(&self) -> &str {
        match self {
            Admission::Created(id) | Admission::Reused(id) => id,
        }
    }

    pub fn is_reused(&self) -> bool {
        matches!(self, Admission::Reused(_))
    }
}

/// Admit a sync task for `user_id`, or return the one already running.
///
/// Holds the store's admission lock for the duration of the check-and-set,
/// so two overlapping calls for the same user cannot both admit. Calling
/// this repeatedly while a task is live is safe and returns the same id.
/// A live task older than `stale_admission_timeout` is no longer trusted
/// for reuse and is superseded by a fresh admission; this bound holds even
/// if the old task's heartbeat loop itself died without releasing.
pub fn start_sync(
    store: &dyn SyncStatusStore,
    config: &SyncConfig,
    user_id: &str,
    sync_type: SyncType,
) -> Result<Admission, AdmissionError> {
    admit(store, config, user_id, sync_type).map_err(|source| AdmissionError {
        user_id: user_id.to_string(),
        source,
    })
}

fn admit(
    store: &dyn SyncStatusStore,
    config: &SyncConfig,
    user_id: &str,
    sync_type: SyncType,
) -> Result<Admission> {
    // The guard opens a fresh transaction and rolls back on drop, so an
    // error anywhere below leaves the row exactly as it was.
    let mut guard = store.begin_admission(user_id)?;
    let existing = guard.current()?;

    if let Some(record) = &existing
        && record.is_active(config.stale_admission_chrono(), Utc::now())
        && let Some(task_id) = record.task_id.clone()
    {
        guard.commit()?;
        debug!("sync for user {user_id} already running as task {task_id}, reusing");
        return Ok(Admission::Reused(task_id));
    }

    let task_id = new_task_id(user_id);
    let record = SyncStatusRecord::admitted(
        user_id,
        &task_id,
        sync_type,
        existing.map(|r| r.created_at),
    );
    guard.upsert(&record)?;
    guard.commit()?;

    info!(
        "admitted {} sync task {task_id} for user {user_id}",
        sync_type.as_str()
    );
    Ok(Admission::Created(task_id))
}

/// Read-only view of the user's admitted task, if any.
///
/// No lock is taken; callers use this to phrase responses ("reused" vs
/// "created") or to poll. An expired-but-unreleased task is reported with
/// `expired = true` and left for the reclaimer — this path never mutates.
pub fn get_active_task_info(
    store: &dyn SyncStatusStore,
    config: &SyncConfig,
    user_id: &str,
) -> Result<Option<TaskInfo>> {
    let Some(record) = store.get(user_id)? else {
        return Ok(None);
    };
    Ok(TaskInfo::from_record(
        &record,
        config.stale_admission_chrono(),
        Utc::now(),
    ))
}

/// Globally-unique task id: user, admission time, random nonce.
/// Uniqueness matters more than the format.
fn new_task_id(user_id: &str) -> String {
    let nonce: u32 = rand::random();
    format!("{}-{}-{:08x}", user_id, Utc::now().timestamp_millis(), nonce)
}
