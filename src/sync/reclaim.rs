//! Zombie task reclamation
//!
//! A process that dies mid-sync (crash, kill -9) leaves its status row
//! `is_syncing` forever; its heartbeat falls silent. The sweep here finds
//! rows whose heartbeat predates the timeout and force-releases them so a
//! new admission can proceed. Safe to run concurrently with itself and
//! with live executors: fresh rows never match the cutoff, and a task
//! finishing between query and release makes the release a no-op.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, warn};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::SyncConfig;
use crate::models::SyncOutcome;
use crate::storage::SyncStatusStore;

/// Sweep once, releasing every task whose heartbeat is older than the
/// timeout. Returns the number reclaimed.
///
/// Best-effort: a row that fails to release is logged and skipped, and the
/// next scheduled sweep retries it. Never returns an error.
pub fn reclaim_zombies(store: &dyn SyncStatusStore, config: &SyncConfig) -> usize {
    let now = Utc::now();
    let cutoff = now - config.heartbeat_timeout_chrono();

    let zombies = match store.find_zombies(cutoff, None) {
        Ok(zombies) => zombies,
        Err(e) => {
            error!("zombie sweep query failed: {e:#}");
            return 0;
        }
    };

    let mut reclaimed = 0;
    for record in zombies {
        let Some(task_id) = record.task_id.as_deref() else {
            warn!(
                "syncing row for user {} has no task_id; cannot reclaim by task",
                record.user_id
            );
            continue;
        };

        let silent_secs = (now - record.updated_at).num_seconds();
        let message = format!("heartbeat timeout, auto-reclaimed at {}", now.to_rfc3339());
        match store.release(task_id, &SyncOutcome::Failed(message)) {
            Ok(true) => {
                warn!(
                    "reclaimed zombie task {task_id} for user {}; heartbeat silent for {silent_secs}s",
                    record.user_id
                );
                reclaimed += 1;
            }
            Ok(false) => {
                debug!("task {task_id} finished between sweep query and release");
            }
            Err(e) => {
                error!("failed to reclaim task {task_id}: {e:#}");
            }
        }
    }
    reclaimed
}

/// Run the sweep on a fixed interval until the returned handle is aborted.
///
/// The first sweep runs immediately, which recovers rows orphaned by a
/// previous process as soon as a new one starts.
pub fn spawn_reclaimer(store: Arc<dyn SyncStatusStore>, config: SyncConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.reclaim_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let reclaimed = reclaim_zombies(store.as_ref(), &config);
            if reclaimed > 0 {
                warn!("reclaimer sweep released {reclaimed} zombie task(s)");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SyncStatusRecord, SyncType};
    use crate::storage::InMemorySyncStatusStore;
    use chrono::Duration;

    fn zombie_row(user: &str, task: &str, silent: Duration) -> SyncStatusRecord {
        let mut record = SyncStatusRecord::admitted(user, task, SyncType::Incremental, None);
        record.updated_at = Utc::now() - silent;
        record
    }

    #[test]
    fn test_reclaims_silent_task() {
        let store = InMemorySyncStatusStore::new();
        let config = SyncConfig::default();
        store
            .upsert(&zombie_row("u1", "t1", Duration::minutes(5)))
            .unwrap();

        assert_eq!(reclaim_zombies(&store, &config), 1);

        let record = store.get("u1").unwrap().unwrap();
        assert!(!record.is_syncing);
        assert_eq!(record.progress_percentage, 0);
        assert!(
            record
                .error_message
                .as_deref()
                .unwrap()
                .contains("heartbeat timeout")
        );
    }

    #[test]
    fn test_spares_fresh_task() {
        let store = InMemorySyncStatusStore::new();
        let config = SyncConfig::default();
        store
            .upsert(&zombie_row("u1", "t1", Duration::seconds(10)))
            .unwrap();

        assert_eq!(reclaim_zombies(&store, &config), 0);
        assert!(store.get("u1").unwrap().unwrap().is_syncing);
    }

    #[test]
    fn test_second_sweep_finds_nothing() {
        let store = InMemorySyncStatusStore::new();
        let config = SyncConfig::default();
        store
            .upsert(&zombie_row("u1", "t1", Duration::minutes(5)))
            .unwrap();
        store
            .upsert(&zombie_row("u2", "t2", Duration::minutes(10)))
            .unwrap();

        assert_eq!(reclaim_zombies(&store, &config), 2);
        assert_eq!(reclaim_zombies(&store, &config), 0);
    }

    #[test]
    fn test_reclaimed_user_can_readmit() {
        let store = InMemorySyncStatusStore::new();
        let config = SyncConfig::default();
        store
            .upsert(&zombie_row("u1", "t1", Duration::minutes(5)))
            .unwrap();
        reclaim_zombies(&store, &config);

        let admission =
            crate::sync::start_sync(&store, &config, "u1", SyncType::Incremental).unwrap();
        assert!(!admission.is_reused());
        assert_ne!(admission.task_id(), "t1");
    }

    #[tokio::test]
    async fn test_scheduled_sweep() {
        let store: Arc<InMemorySyncStatusStore> = Arc::new(InMemorySyncStatusStore::new());
        store
            .upsert(&zombie_row("u1", "t1", Duration::minutes(5)))
            .unwrap();

        let handle = spawn_reclaimer(store.clone(), SyncConfig::fast());
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        handle.abort();

        assert!(!store.get("u1").unwrap().unwrap().is_syncing);
    }
}
