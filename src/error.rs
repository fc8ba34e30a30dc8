//! Error types for the sync status subsystem
//!
//! Only the failures callers must distinguish get their own type; internal
//! heartbeat and reclamation failures are logged and absorbed, with the
//! periodic reclaimer acting as the backstop.

/// Storage failure during the admission lock/check/write sequence
///
/// Always means the transaction was rolled back and no task was admitted.
/// Safe to retry.
#[derive(Debug, thiserror::Error)]
#[error("sync admission failed for user {user_id}: {source}")]
pub struct AdmissionError {
    pub user_id: String,
    #[source]
    pub source: anyhow::Error,
}

/// Failure surfaced by an awaited sync execution
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    /// The work function itself failed; the failure has already been
    /// recorded on the status row before this is returned
    #[error("sync work failed for task {task_id}: {source}")]
    Work {
        task_id: String,
        #[source]
        source: anyhow::Error,
    },
    /// The final status release could not be written; the reclaimer will
    /// eventually force-release the row
    #[error("failed to release status for task {task_id}: {source}")]
    Release {
        task_id: String,
        #[source]
        source: anyhow::Error,
    },
}
