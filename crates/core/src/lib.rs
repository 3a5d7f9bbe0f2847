pub mod artifact;
pub mod config;
pub mod fault;
pub mod metrics;
pub mod orchestrator;
pub mod reassembly;
pub mod sched;
pub mod segment;
pub mod stage;
pub mod task;
pub mod testing;

pub use artifact::{
    Artifact, ArtifactError, ArtifactKey, ArtifactStore, FsArtifactStore,
};
pub use config::{load_config, load_config_from_str, validate_config, Config, ConfigError};
pub use fault::{FaultDecision, RetryPolicy};
pub use orchestrator::{
    CancelHandle, OrchestratorConfig, OrchestratorError, PipelineOrchestrator, RunPhase,
    RunReport, RunStatus, SegmentOutcome, SegmentReport,
};
pub use reassembly::{ReassembledOutput, Reassembler, ReassemblyError, ReassemblyMode};
pub use segment::{Segment, Segmenter, SourceRef};
pub use stage::{
    ArtifactKind, ExecutorSet, PipelineConfigError, ResourceClass, StageContext, StageExecutor,
    StageFailure, StageInput, StageRegistry, StageSpec,
};
pub use task::{SqliteTaskStore, Task, TaskError, TaskKey, TaskStatus, TaskStore};
