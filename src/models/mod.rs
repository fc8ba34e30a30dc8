//! Domain models for sync status tracking

mod health;
mod status;
mod task;

pub use health::{HealthSnapshot, HealthStatistics, ZombieSample};
pub use status::{StatsMap, SyncOutcome, SyncStatusRecord, SyncType};
pub use task::TaskInfo;
