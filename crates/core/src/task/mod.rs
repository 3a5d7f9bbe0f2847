//! Task tracking.
//!
//! One task per (segment, stage). Task statuses are the engine's only
//! mutable state and every transition is persisted, so a crashed run
//! can rebuild its graph from the store plus the artifact cache.

mod sqlite_store;
mod store;

pub use sqlite_store::SqliteTaskStore;
pub use store::{TaskError, TaskStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a task within a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub segment_id: u32,
    pub stage: String,
}

impl TaskKey {
    pub fn new(segment_id: u32, stage: impl Into<String>) -> Self {
        Self {
            segment_id,
            stage: stage.into(),
        }
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.segment_id, self.stage)
    }
}

/// Current status of a task.
///
/// State machine flow:
/// ```text
/// Pending -> Ready -> Running -> Succeeded
///                        |
///                        v
///              Pending (retry, with delay)
///                        |
///                        v
///                PermanentlyFailed
///
/// Any non-terminal status can transition to Cancelled.
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for upstream artifacts (or for a retry delay to pass).
    Pending,

    /// All inputs available, eligible for dispatch.
    Ready,

    /// An executor is working on this task.
    Running { started_at: DateTime<Utc> },

    /// Output artifact stored (terminal).
    Succeeded {
        finished_at: DateTime<Utc>,
        /// True when the artifact already existed and no executor ran.
        #[serde(default)]
        resumed: bool,
    },

    /// Retries exhausted or permanent failure (terminal).
    PermanentlyFailed {
        error: String,
        failed_at: DateTime<Utc>,
    },

    /// Run was cancelled before this task finished (terminal, distinct
    /// from failure).
    Cancelled { cancelled_at: DateTime<Utc> },
}

impl TaskStatus {
    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded { .. }
                | TaskStatus::PermanentlyFailed { .. }
                | TaskStatus::Cancelled { .. }
        )
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, TaskStatus::Succeeded { .. })
    }

    pub fn is_running(&self) -> bool {
        matches!(self, TaskStatus::Running { .. })
    }

    /// Returns the status type as a string (for filtering).
    pub fn status_type(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::Running { .. } => "running",
            TaskStatus::Succeeded { .. } => "succeeded",
            TaskStatus::PermanentlyFailed { .. } => "permanently_failed",
            TaskStatus::Cancelled { .. } => "cancelled",
        }
    }
}

/// A unit of work: one stage applied to one segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Run this task belongs to.
    pub run_id: String,

    pub key: TaskKey,

    /// Position of the stage in the pipeline, denormalized for
    /// priority ordering.
    pub ordinal: u32,

    pub status: TaskStatus,

    /// Execution attempts so far (resumed tasks stay at 0).
    pub attempts: u32,

    /// Earliest time this task may run again after a transient failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,

    /// Most recent failure message, kept across retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Output fingerprint, fixed at graph-build time.
    pub fingerprint: String,

    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        run_id: impl Into<String>,
        key: TaskKey,
        ordinal: u32,
        fingerprint: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            key,
            ordinal,
            status: TaskStatus::Pending,
            attempts: 0,
            not_before: None,
            last_error: None,
            fingerprint: fingerprint.into(),
            updated_at: Utc::now(),
        }
    }
}
