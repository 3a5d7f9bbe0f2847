//! Pipeline orchestration.

mod config;
mod runner;
mod types;

pub use config::OrchestratorConfig;
pub use runner::{CancelHandle, PipelineOrchestrator, RunStatus};
pub use types::{
    OrchestratorError, RunPhase, RunReport, SegmentOutcome, SegmentReport,
};
