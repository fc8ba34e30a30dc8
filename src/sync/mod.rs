//! Sync task lifecycle: admission, monitored execution, reclamation
//!
//! Admission confers ownership of a user's status row to exactly one task;
//! the executor keeps that ownership visibly alive via heartbeats and
//! guarantees release on every exit path; the reclaimer force-releases
//! tasks whose owner died without releasing.

mod admission;
mod executor;
mod health;
mod reclaim;

pub use admission::{Admission, get_active_task_info, start_sync};
pub use executor::{SyncContext, execute, spawn_sync};
pub use health::get_health_status;
pub use reclaim::{reclaim_zombies, spawn_reclaimer};
