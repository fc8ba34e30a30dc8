//! Storage traits and implementations
//!
//! This module defines the storage abstraction for the per-user sync status
//! record. The trait-based design allows swapping between the in-memory
//! store used in tests and the SQLite store used in production.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemorySyncStatusStore;
pub use sqlite::SqliteSyncStatusStore;
pub use traits::{AdmissionGuard, SyncStatusStore};
