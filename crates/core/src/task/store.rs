//! Task store trait.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::{Task, TaskKey, TaskStatus};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task not found: {run_id} {key}")]
    NotFound { run_id: String, key: TaskKey },

    #[error("Database error: {0}")]
    Database(String),
}

/// Durable storage for task state.
///
/// Every status transition goes through the store, so the persisted
/// picture is never behind the in-memory one by more than the
/// transition currently being applied.
pub trait TaskStore: Send + Sync {
    /// Insert a task, or refresh its fingerprint/ordinal if it already
    /// exists from a previous run attempt. Existing status, attempts
    /// and error fields are preserved on conflict while the fingerprint
    /// is unchanged; a new fingerprint resets them, since progress made
    /// against different inputs does not carry over.
    fn upsert(&self, task: &Task) -> Result<(), TaskError>;

    fn get(&self, run_id: &str, key: &TaskKey) -> Result<Option<Task>, TaskError>;

    /// All tasks of a run, ordered by (ordinal, segment id).
    fn list_run(&self, run_id: &str) -> Result<Vec<Task>, TaskError>;

    fn update_status(
        &self,
        run_id: &str,
        key: &TaskKey,
        status: TaskStatus,
    ) -> Result<Task, TaskError>;

    /// Record the outcome of a failed attempt: bumped attempt counter,
    /// optional retry-not-before time and the error message.
    fn record_attempt(
        &self,
        run_id: &str,
        key: &TaskKey,
        attempts: u32,
        not_before: Option<DateTime<Utc>>,
        last_error: &str,
    ) -> Result<Task, TaskError>;

    /// Number of tasks of a run with the given status type.
    fn count_by_status(&self, run_id: &str, status_type: &str) -> Result<i64, TaskError>;
}
