//! Stage executor seam.
//!
//! Executors wrap the actual media/ML work (ffmpeg slicing, Whisper,
//! IndicTrans, XTTS, Wav2Lip, ...). The engine treats them as opaque
//! async collaborators that turn an input payload into an output
//! payload or a classified failure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::artifact::Artifact;
use crate::segment::{Segment, SourceRef};

use super::{PipelineConfigError, StageFailure, StageSpec};

/// Input handed to an executor: the raw source for the first stage,
/// the upstream artifact for every other stage.
#[derive(Debug, Clone)]
pub enum StageInput {
    Source(SourceRef),
    Artifact(Artifact),
}

impl StageInput {
    /// Payload bytes, if this input carries any.
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            StageInput::Source(_) => None,
            StageInput::Artifact(artifact) => Some(&artifact.payload),
        }
    }
}

/// Everything an executor needs for one attempt.
///
/// Owned so it can cross a `tokio::spawn` boundary. The cancel flag is
/// shared with the orchestrator; long-running executors should check it
/// between units of work and bail out with a transient failure.
#[derive(Clone)]
pub struct StageContext {
    pub segment: Segment,
    pub stage: StageSpec,
    pub input: StageInput,
    pub attempt: u32,
    cancelled: Arc<AtomicBool>,
}

impl StageContext {
    pub fn new(
        segment: Segment,
        stage: StageSpec,
        input: StageInput,
        attempt: u32,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            segment,
            stage,
            input,
            attempt,
            cancelled,
        }
    }

    /// True once the run has been cancelled. Cooperative: executors
    /// poll this between units of work.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// One pipeline stage's execution backend.
#[async_trait::async_trait]
pub trait StageExecutor: Send + Sync {
    /// Run the stage over one segment, returning the output payload.
    async fn execute(&self, ctx: StageContext) -> Result<Vec<u8>, StageFailure>;
}

/// Maps stage names to executors, validated against a registry.
#[derive(Clone)]
pub struct ExecutorSet {
    executors: HashMap<String, Arc<dyn StageExecutor>>,
}

impl ExecutorSet {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    pub fn register(
        mut self,
        stage_name: impl Into<String>,
        executor: Arc<dyn StageExecutor>,
    ) -> Self {
        self.executors.insert(stage_name.into(), executor);
        self
    }

    pub fn get(&self, stage_name: &str) -> Result<Arc<dyn StageExecutor>, PipelineConfigError> {
        self.executors
            .get(stage_name)
            .cloned()
            .ok_or_else(|| PipelineConfigError::MissingExecutor(stage_name.to_string()))
    }

    /// Verify that every stage in `stages` has a registered executor.
    pub fn validate(&self, stages: &[StageSpec]) -> Result<(), PipelineConfigError> {
        for stage in stages {
            if !self.executors.contains_key(&stage.name) {
                return Err(PipelineConfigError::MissingExecutor(stage.name.clone()));
            }
        }
        Ok(())
    }
}

impl Default for ExecutorSet {
    fn default() -> Self {
        Self::new()
    }
}
