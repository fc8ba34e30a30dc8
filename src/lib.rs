//! Syncguard - sync status concurrency and recovery for mail sync tasks
//!
//! This crate guarantees at-most-one active sync task per user and recovers
//! from tasks that die without cleaning up after themselves:
//! - Idempotent admission under a storage-level lock
//! - Heartbeat-monitored execution with guaranteed status release
//! - Timeout-based reclamation of zombie tasks
//! - Read-only progress and health reporting
//!
//! The actual sync work (mail fetching, analysis) is supplied by the caller
//! as an async work function; this crate owns only the status bookkeeping.
//! Coordination happens entirely through the status table, so admission
//! stays safe across processes sharing one database.

pub mod config;
pub mod error;
pub mod models;
pub mod query;
pub mod storage;
pub mod sync;

pub use config::SyncConfig;
pub use error::{AdmissionError, ExecuteError};
pub use models::{
    HealthSnapshot, HealthStatistics, StatsMap, SyncOutcome, SyncStatusRecord, SyncType, TaskInfo,
    ZombieSample,
};
pub use query::{SyncProgress, get_progress};
pub use storage::{
    AdmissionGuard, InMemorySyncStatusStore, SqliteSyncStatusStore, SyncStatusStore,
};
pub use sync::{
    // Admission (caller-facing entry point)
    Admission, get_active_task_info, start_sync,
    // Monitored execution
    SyncContext, execute, spawn_sync,
    // Operational: reclamation and health
    get_health_status, reclaim_zombies, spawn_reclaimer,
};
