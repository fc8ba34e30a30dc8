//! Read-only health aggregation over the sync status table

use chrono::Utc;
use log::warn;

use crate::config::SyncConfig;
use crate::models::{HealthSnapshot, ZombieSample};
use crate::storage::SyncStatusStore;

/// Build a health snapshot: aggregate counters plus a bounded sample of
/// zombie rows for diagnosis.
///
/// Never returns an error — a store failure degrades the snapshot to
/// `healthy = false` with the failure recorded, so a health endpoint can
/// always answer.
pub fn get_health_status(store: &dyn SyncStatusStore, config: &SyncConfig) -> HealthSnapshot {
    let now = Utc::now();
    let zombie_cutoff = now - config.heartbeat_timeout_chrono();
    let recent_cutoff = now - config.recent_window_chrono();

    let statistics = match store.statistics(zombie_cutoff, recent_cutoff) {
        Ok(statistics) => statistics,
        Err(e) => {
            warn!("health check could not read statistics: {e:#}");
            return HealthSnapshot::degraded(format!("{e:#}"));
        }
    };

    let zombie_samples = match store.find_zombies(zombie_cutoff, Some(config.zombie_sample_limit))
    {
        Ok(zombies) => zombies
            .into_iter()
            .map(|record| ZombieSample {
                silent_secs: (now - record.updated_at).num_seconds(),
                user_id: record.user_id,
                task_id: record.task_id,
                started_at: record.started_at,
            })
            .collect(),
        Err(e) => {
            warn!("health check could not sample zombies: {e:#}");
            Vec::new()
        }
    };

    HealthSnapshot {
        healthy: statistics.zombie_tasks == 0 && statistics.inconsistent_records == 0,
        checked_at: now,
        statistics,
        zombie_samples,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SyncOutcome, SyncStatusRecord, SyncType};
    use crate::storage::InMemorySyncStatusStore;
    use chrono::Duration;

    #[test]
    fn test_empty_store_is_healthy() {
        let store = InMemorySyncStatusStore::new();
        let snapshot = get_health_status(&store, &SyncConfig::default());
        assert!(snapshot.healthy);
        assert_eq!(snapshot.statistics.total_records, 0);
        assert!(snapshot.zombie_samples.is_empty());
        assert!(snapshot.error.is_none());
    }

    #[test]
    fn test_zombie_degrades_health() {
        let store = InMemorySyncStatusStore::new();
        let config = SyncConfig::default();

        // One fresh active sync, one zombie
        store
            .upsert(&SyncStatusRecord::admitted("u1", "t1", SyncType::Full, None))
            .unwrap();
        let mut zombie = SyncStatusRecord::admitted("u2", "t2", SyncType::Incremental, None);
        zombie.updated_at = Utc::now() - Duration::minutes(5);
        store.upsert(&zombie).unwrap();

        let snapshot = get_health_status(&store, &config);
        assert!(!snapshot.healthy);
        assert_eq!(snapshot.statistics.active_syncs, 2);
        assert_eq!(snapshot.statistics.zombie_tasks, 1);
        assert_eq!(snapshot.zombie_samples.len(), 1);
        assert_eq!(snapshot.zombie_samples[0].user_id, "u2");
        assert!(snapshot.zombie_samples[0].silent_secs >= 240);
    }

    #[test]
    fn test_healthy_again_after_reclaim() {
        let store = InMemorySyncStatusStore::new();
        let config = SyncConfig::default();

        let mut zombie = SyncStatusRecord::admitted("u1", "t1", SyncType::Full, None);
        zombie.updated_at = Utc::now() - Duration::minutes(5);
        store.upsert(&zombie).unwrap();
        assert!(!get_health_status(&store, &config).healthy);

        crate::sync::reclaim_zombies(&store, &config);
        let snapshot = get_health_status(&store, &config);
        assert!(snapshot.healthy);
        assert_eq!(snapshot.statistics.zombie_tasks, 0);
    }

    #[test]
    fn test_recent_completion_counted() {
        let store = InMemorySyncStatusStore::new();
        let config = SyncConfig::default();

        store
            .upsert(&SyncStatusRecord::admitted("u1", "t1", SyncType::Full, None))
            .unwrap();
        store
            .release("t1", &SyncOutcome::Completed(Default::default()))
            .unwrap();

        let snapshot = get_health_status(&store, &config);
        assert!(snapshot.healthy);
        assert_eq!(snapshot.statistics.recent_completions, 1);
        assert_eq!(snapshot.statistics.active_syncs, 0);
    }

    #[test]
    fn test_sample_limit_respected() {
        let store = InMemorySyncStatusStore::new();
        let config = SyncConfig {
            zombie_sample_limit: 2,
            ..SyncConfig::default()
        };

        for i in 0..5 {
            let mut zombie = SyncStatusRecord::admitted(
                format!("u{i}"),
                format!("t{i}"),
                SyncType::Incremental,
                None,
            );
            zombie.updated_at = Utc::now() - Duration::minutes(10);
            store.upsert(&zombie).unwrap();
        }

        let snapshot = get_health_status(&store, &config);
        assert_eq!(snapshot.statistics.zombie_tasks, 5);
        assert_eq!(snapshot.zombie_samples.len(), 2);
    }
}
