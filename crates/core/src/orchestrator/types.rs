//! Orchestrator types and errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::{ArtifactError, ArtifactKey};
use crate::segment::SegmentError;
use crate::stage::PipelineConfigError;
use crate::task::TaskError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Segmentation error: {0}")]
    Segment(#[from] SegmentError),

    #[error("Pipeline configuration error: {0}")]
    PipelineConfig(#[from] PipelineConfigError),

    #[error("Task store error: {0}")]
    TaskStore(#[from] TaskError),

    #[error("Artifact store error: {0}")]
    ArtifactStore(#[from] ArtifactError),

    #[error("Run already in progress")]
    AlreadyRunning,

    #[error("Internal channel closed unexpectedly")]
    ChannelClosed,
}

/// Lifecycle phase of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Building the task graph and sweeping for resumable work.
    Initializing,
    /// Dispatching tasks.
    Scheduling,
    /// No more dispatchable work; waiting for in-flight tasks.
    Draining,
    /// All segments completed (terminal).
    Completed,
    /// At least one segment failed or was cancelled (terminal).
    CompletedWithFailures,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::CompletedWithFailures)
    }
}

/// Final outcome of one segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SegmentOutcome {
    /// Every stage succeeded.
    Completed,
    /// A stage failed permanently; later stages of this segment never
    /// ran.
    Failed { stage: String, error: String },
    /// The run was cancelled before this segment finished.
    Cancelled,
}

impl SegmentOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SegmentOutcome::Completed)
    }
}

/// Per-segment entry in the run report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SegmentReport {
    pub segment_id: u32,
    pub outcome: SegmentOutcome,
    /// Key of the final-stage artifact, present iff the segment
    /// completed. Feeds reassembly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_artifact: Option<ArtifactKey>,
}

/// Summary of a finished run. Failures are reported here per segment,
/// never surfaced as a bare process error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub run_id: String,
    pub phase: RunPhase,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub segments: Vec<SegmentReport>,
    /// Tasks that actually ran an executor.
    pub tasks_executed: u64,
    /// Tasks satisfied from the artifact store without execution.
    pub tasks_resumed: u64,
}

impl RunReport {
    pub fn completed_segments(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| s.outcome.is_completed())
            .count()
    }

    pub fn failed_segments(&self) -> Vec<u32> {
        self.segments
            .iter()
            .filter(|s| !s.outcome.is_completed())
            .map(|s| s.segment_id)
            .collect()
    }
}
