//! Monitored sync execution with heartbeat liveness
//!
//! Runs the caller-supplied work future alongside a heartbeat task that
//! keeps the status row's `updated_at` fresh while the work is suspended
//! on network or database I/O. Whatever the outcome, the row is released
//! before `execute` returns; the heartbeat is stopped and awaited first so
//! release is the last write for the task.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::SyncConfig;
use crate::error::ExecuteError;
use crate::models::{StatsMap, SyncOutcome, SyncType};
use crate::storage::SyncStatusStore;

/// Handle given to the work function for progress reporting and
/// cancellation observation
#[derive(Clone)]
pub struct SyncContext {
    user_id: String,
    sync_type: SyncType,
    task_id: String,
    store: Arc<dyn SyncStatusStore>,
    cancelled: Arc<AtomicBool>,
}

impl SyncContext {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn sync_type(&self) -> SyncType {
        self.sync_type
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Record in-flight progress on the status row.
    ///
    /// Percentages cap at 99; 100 is written by the final release. Write
    /// failures are logged, not surfaced — losing a progress update never
    /// fails the sync itself.
    pub fn report_progress(&self, percentage: u8, stats: StatsMap) {
        match self.store.update_progress(&self.task_id, percentage, &stats) {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    "progress update for task {} found no live row; task was reclaimed",
                    self.task_id
                );
                self.cancelled.store(true, Ordering::Relaxed);
            }
            Err(e) => warn!("progress write failed for task {}: {e:#}", self.task_id),
        }
    }

    /// True once the row has been released out from under this task (a
    /// reclaimer swept it). The work is not preempted; long-running work
    /// should poll this and wind down early when set.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Run `work` for an admitted task under heartbeat monitoring.
///
/// The status row never stays `is_syncing` after this returns, barring
/// process crash — that gap is covered by the zombie reclaimer.
pub async fn execute<F, Fut>(
    store: Arc<dyn SyncStatusStore>,
    config: &SyncConfig,
    user_id: &str,
    sync_type: SyncType,
    task_id: &str,
    work: F,
) -> Result<StatsMap, ExecuteError>
where
    F: FnOnce(SyncContext) -> Fut,
    Fut: Future<Output = anyhow::Result<StatsMap>>,
{
    let cancelled = Arc::new(AtomicBool::new(false));
    let heartbeat = spawn_heartbeat(
        store.clone(),
        task_id.to_string(),
        config.heartbeat_interval,
        cancelled.clone(),
    );

    let context = SyncContext {
        user_id: user_id.to_string(),
        sync_type,
        task_id: task_id.to_string(),
        store: store.clone(),
        cancelled,
    };
    let result = work(context).await;

    // Stop the pulse and wait for it before the terminal write, so no
    // heartbeat can land after release.
    heartbeat.abort();
    let _ = heartbeat.await;

    match result {
        Ok(stats) => {
            match store.release(task_id, &SyncOutcome::Completed(stats.clone())) {
                Ok(true) => {
                    info!("sync task {task_id} for user {user_id} completed");
                }
                Ok(false) => {
                    // Reclaimed while we were finishing; the work itself
                    // still succeeded.
                    warn!("sync task {task_id} completed but its row was already released");
                }
                Err(source) => {
                    return Err(ExecuteError::Release {
                        task_id: task_id.to_string(),
                        source,
                    });
                }
            }
            Ok(stats)
        }
        Err(source) => {
            let message = format!("{source:#}");
            match store.release(task_id, &SyncOutcome::Failed(message)) {
                Ok(_) => {}
                Err(e) => error!("failed to record failure for task {task_id}: {e:#}"),
            }
            Err(ExecuteError::Work {
                task_id: task_id.to_string(),
                source,
            })
        }
    }
}

/// Fire-and-forget variant of [`execute`] for callers that respond before
/// the sync finishes; failures are logged instead of returned.
pub fn spawn_sync<F, Fut>(
    store: Arc<dyn SyncStatusStore>,
    config: SyncConfig,
    user_id: String,
    sync_type: SyncType,
    task_id: String,
    work: F,
) -> JoinHandle<()>
where
    F: FnOnce(SyncContext) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<StatsMap>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = execute(store, &config, &user_id, sync_type, &task_id, work).await {
            error!("background sync for user {user_id} failed: {e:#}");
        }
    })
}

fn spawn_heartbeat(
    store: Arc<dyn SyncStatusStore>,
    task_id: String,
    interval: Duration,
    cancelled: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the admission write just
        // touched the row, so skip it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match store.touch_heartbeat(&task_id) {
                Ok(true) => debug!("heartbeat for task {task_id}"),
                Ok(false) => {
                    warn!("heartbeat for task {task_id} found no live row; task was reclaimed");
                    cancelled.store(true, Ordering::Relaxed);
                    break;
                }
                Err(e) => {
                    // Not retried: the zombie reclaimer backstops a task
                    // whose heartbeat stopped writing.
                    warn!("heartbeat write failed for task {task_id}: {e:#}");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SyncStatusRecord;
    use crate::storage::InMemorySyncStatusStore;
    use serde_json::json;

    fn stats(pairs: &[(&str, i64)]) -> StatsMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect()
    }

    fn seeded_store(user: &str, task: &str) -> Arc<InMemorySyncStatusStore> {
        let store = Arc::new(InMemorySyncStatusStore::new());
        store
            .upsert(&SyncStatusRecord::admitted(
                user,
                task,
                SyncType::Incremental,
                None,
            ))
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_success_path() {
        let store = seeded_store("u1", "t1");
        let config = SyncConfig::fast();

        let result = execute(
            store.clone(),
            &config,
            "u1",
            SyncType::Incremental,
            "t1",
            |ctx| async move {
                ctx.report_progress(50, stats(&[("new", 10)]));
                Ok(stats(&[("new", 20), ("updated", 5)]))
            },
        )
        .await
        .unwrap();

        assert_eq!(result, stats(&[("new", 20), ("updated", 5)]));
        let record = store.get("u1").unwrap().unwrap();
        assert!(!record.is_syncing);
        assert_eq!(record.progress_percentage, 100);
        assert_eq!(record.current_stats, stats(&[("new", 20), ("updated", 5)]));
        assert!(record.error_message.is_none());
    }

    #[tokio::test]
    async fn test_failure_path_records_error() {
        let store = seeded_store("u1", "t1");
        let config = SyncConfig::fast();

        let err = execute(
            store.clone(),
            &config,
            "u1",
            SyncType::Full,
            "t1",
            |_ctx| async move { Err(anyhow::anyhow!("gmail unreachable")) },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExecuteError::Work { .. }));

        let record = store.get("u1").unwrap().unwrap();
        assert!(!record.is_syncing);
        assert_eq!(record.progress_percentage, 0);
        assert!(
            record
                .error_message
                .as_deref()
                .unwrap()
                .contains("gmail unreachable")
        );
    }

    #[tokio::test]
    async fn test_progress_is_clamped_while_running() {
        let store = seeded_store("u1", "t1");
        let config = SyncConfig::fast();

        execute(
            store.clone(),
            &config,
            "u1",
            SyncType::Full,
            "t1",
            |ctx| {
                let store = ctx.store.clone();
                async move {
                    ctx.report_progress(100, StatsMap::new());
                    let mid = store.get("u1").unwrap().unwrap();
                    assert!(mid.is_syncing);
                    assert_eq!(mid.progress_percentage, 99);
                    assert!(mid.progress_is_consistent());
                    Ok(StatsMap::new())
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(store.get("u1").unwrap().unwrap().progress_percentage, 100);
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_row_fresh_during_work() {
        let store = seeded_store("u1", "t1");
        let config = SyncConfig::fast();

        // Age the row so only heartbeats can refresh it
        let mut record = store.get("u1").unwrap().unwrap();
        record.updated_at = chrono::Utc::now() - chrono::Duration::seconds(30);
        store.upsert(&record).unwrap();
        let aged = store.get("u1").unwrap().unwrap().updated_at;

        execute(
            store.clone(),
            &config,
            "u1",
            SyncType::Incremental,
            "t1",
            |ctx| {
                let store = ctx.store.clone();
                async move {
                    // Suspend long enough for several heartbeat pulses,
                    // then observe the row while the task still owns it
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    let mid = store.get("u1").unwrap().unwrap();
                    assert!(mid.is_syncing);
                    assert!(mid.updated_at > aged);
                    Ok(StatsMap::new())
                }
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_external_reclamation_observed_as_cancellation() {
        let store = seeded_store("u1", "t1");
        let config = SyncConfig::fast();

        let result = execute(
            store.clone(),
            &config,
            "u1",
            SyncType::Incremental,
            "t1",
            |ctx| {
                let store = ctx.store.clone();
                async move {
                    assert!(!ctx.is_cancelled());
                    // Simulate the reclaimer force-releasing the row
                    store
                        .release("t1", &SyncOutcome::Failed("heartbeat timeout".into()))
                        .unwrap();
                    // The next heartbeat pulse notices the row is gone
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    assert!(ctx.is_cancelled());
                    Ok(StatsMap::new())
                }
            },
        )
        .await;

        // Work still "succeeded"; the terminal release was a no-op
        assert!(result.is_ok());
        let record = store.get("u1").unwrap().unwrap();
        assert!(!record.is_syncing);
        assert_eq!(record.progress_percentage, 0);
    }

    #[tokio::test]
    async fn test_spawn_sync_logs_instead_of_raising() {
        let store = seeded_store("u1", "t1");

        let handle = spawn_sync(
            store.clone(),
            SyncConfig::fast(),
            "u1".into(),
            SyncType::Full,
            "t1".into(),
            |_ctx| async move { Err(anyhow::anyhow!("boom")) },
        );
        handle.await.unwrap();

        let record = store.get("u1").unwrap().unwrap();
        assert!(!record.is_syncing);
        assert!(record.error_message.is_some());
    }
}
