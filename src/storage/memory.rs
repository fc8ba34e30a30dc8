//! In-memory storage implementation
//!
//! Used for tests and as a stub where no database is wired up. Admission
//! sections are serialized on the map mutex, which is stricter than the
//! per-user locking of the SQLite backend but preserves the same contract.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use chrono::{DateTime, Utc};

use super::traits::{AdmissionGuard, SyncStatusStore};
use crate::models::{HealthStatistics, StatsMap, SyncOutcome, SyncStatusRecord};

/// In-memory implementation of SyncStatusStore
pub struct InMemorySyncStatusStore {
    records: Mutex<HashMap<String, SyncStatusRecord>>,
}

impl InMemorySyncStatusStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Number of records held (test helper)
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemorySyncStatusStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Admission section holding the map lock; staged writes are published
/// on commit and discarded on drop.
struct MemoryAdmissionGuard<'a> {
    records: MutexGuard<'a, HashMap<String, SyncStatusRecord>>,
    user_id: String,
    staged: Option<SyncStatusRecord>,
}

impl AdmissionGuard for MemoryAdmissionGuard<'_> {
    fn current(&mut self) -> Result<Option<SyncStatusRecord>> {
        if let Some(staged) = &self.staged {
            return Ok(Some(staged.clone()));
        }
        Ok(self.records.get(&self.user_id).cloned())
    }

    fn upsert(&mut self, record: &SyncStatusRecord) -> Result<()> {
        self.staged = Some(record.clone());
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let mut this = *self;
        if let Some(record) = this.staged.take() {
            this.records.insert(this.user_id.clone(), record);
        }
        Ok(())
    }
}

impl SyncStatusStore for InMemorySyncStatusStore {
    fn begin_admission<'a>(&'a self, user_id: &str) -> Result<Box<dyn AdmissionGuard + 'a>> {
        Ok(Box::new(MemoryAdmissionGuard {
            records: self.records.lock().unwrap(),
            user_id: user_id.to_string(),
            staged: None,
        }))
    }

    fn get(&self, user_id: &str) -> Result<Option<SyncStatusRecord>> {
        Ok(self.records.lock().unwrap().get(user_id).cloned())
    }

    fn upsert(&self, record: &SyncStatusRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .insert(record.user_id.clone(), record.clone());
        Ok(())
    }

    fn release(&self, task_id: &str, outcome: &SyncOutcome) -> Result<bool> {
        let mut records = self.records.lock().unwrap();
        let Some(record) = records
            .values_mut()
            .find(|r| r.is_syncing && r.task_id.as_deref() == Some(task_id))
        else {
            return Ok(false);
        };

        record.is_syncing = false;
        record.updated_at = Utc::now();
        match outcome {
            SyncOutcome::Completed(stats) => {
                record.progress_percentage = 100;
                record.current_stats = stats.clone();
                record.error_message = None;
            }
            SyncOutcome::Failed(message) => {
                record.progress_percentage = 0;
                record.error_message = Some(message.clone());
            }
        }
        Ok(true)
    }

    fn touch_heartbeat(&self, task_id: &str) -> Result<bool> {
        let mut records = self.records.lock().unwrap();
        match records
            .values_mut()
            .find(|r| r.is_syncing && r.task_id.as_deref() == Some(task_id))
        {
            Some(record) => {
                record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn update_progress(&self, task_id: &str, percentage: u8, stats: &StatsMap) -> Result<bool> {
        let mut records = self.records.lock().unwrap();
        match records
            .values_mut()
            .find(|r| r.is_syncing && r.task_id.as_deref() == Some(task_id))
        {
            Some(record) => {
                // 100 is reserved for release
                record.progress_percentage = percentage.min(99);
                record.current_stats = stats.clone();
                record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn find_zombies(
        &self,
        cutoff: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<SyncStatusRecord>> {
        let records = self.records.lock().unwrap();
        let mut zombies: Vec<SyncStatusRecord> = records
            .values()
            .filter(|r| r.is_syncing && r.updated_at < cutoff)
            .cloned()
            .collect();
        zombies.sort_by_key(|r| r.updated_at);
        if let Some(limit) = limit {
            zombies.truncate(limit);
        }
        Ok(zombies)
    }

    fn statistics(
        &self,
        zombie_cutoff: DateTime<Utc>,
        recent_cutoff: DateTime<Utc>,
    ) -> Result<HealthStatistics> {
        let records = self.records.lock().unwrap();
        let mut stats = HealthStatistics {
            total_records: records.len(),
            ..Default::default()
        };
        for record in records.values() {
            if record.is_syncing {
                stats.active_syncs += 1;
                if record.updated_at < zombie_cutoff {
                    stats.zombie_tasks += 1;
                }
            } else if record.progress_percentage == 100 && record.updated_at >= recent_cutoff {
                stats.recent_completions += 1;
            }
            if !record.progress_is_consistent() {
                stats.inconsistent_records += 1;
            }
        }
        Ok(stats)
    }
}
