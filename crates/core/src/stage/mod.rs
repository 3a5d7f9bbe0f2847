//! Pipeline stage definitions.
//!
//! A stage is one unit of work applied per segment (transcription,
//! translation, speech synthesis, ...). The engine never looks inside
//! stage logic; it only knows each stage's artifact kinds, resource
//! class and failure classification.

mod executor;
mod registry;

pub use executor::{ExecutorSet, StageContext, StageExecutor, StageInput};
pub use registry::StageRegistry;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of data flowing between stages.
///
/// `Source` is only ever a first-stage input: the raw probed media.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Source,
    SourceSlice,
    AudioTrack,
    Transcript,
    Translation,
    SynthesizedSpeech,
    DubbedClip,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ArtifactKind::Source => "source",
            ArtifactKind::SourceSlice => "source_slice",
            ArtifactKind::AudioTrack => "audio_track",
            ArtifactKind::Transcript => "transcript",
            ArtifactKind::Translation => "translation",
            ArtifactKind::SynthesizedSpeech => "synthesized_speech",
            ArtifactKind::DubbedClip => "dubbed_clip",
        };
        write!(f, "{}", name)
    }
}

/// Resource class a stage must hold a slot in while running.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    /// CPU-only work (demux, slicing, muxing).
    Cpu,
    /// Standard GPU slot (lip sync, face restoration).
    Gpu,
    /// Large-model GPU slot (ASR, MT, TTS).
    GpuLarge,
}

impl std::fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceClass::Cpu => write!(f, "cpu"),
            ResourceClass::Gpu => write!(f, "gpu"),
            ResourceClass::GpuLarge => write!(f, "gpu_large"),
        }
    }
}

/// Opaque stage parameters.
///
/// Ordered so the serialized form is stable; parameters hash into the
/// artifact fingerprint, so two runs with different knobs never share
/// cached output.
pub type StageParams = BTreeMap<String, String>;

/// Immutable description of one pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageSpec {
    /// Unique stage name, e.g. "transcribe".
    pub name: String,
    /// Position in the pipeline (0-based, assigned by the registry).
    #[serde(default)]
    pub ordinal: u32,
    /// Kind this stage consumes.
    pub input: ArtifactKind,
    /// Kind this stage produces.
    pub output: ArtifactKind,
    /// Resource class a worker must hold while executing this stage.
    pub resource_class: ResourceClass,
    /// Stage parameters, hashed into output fingerprints.
    #[serde(default)]
    pub params: StageParams,
    /// Deterministic stages reuse cached output across runs; others
    /// mix the run id into their fingerprint.
    #[serde(default = "default_deterministic")]
    pub deterministic: bool,
}

fn default_deterministic() -> bool {
    true
}

impl StageSpec {
    pub fn new(
        name: impl Into<String>,
        input: ArtifactKind,
        output: ArtifactKind,
        resource_class: ResourceClass,
    ) -> Self {
        Self {
            name: name.into(),
            ordinal: 0,
            input,
            output,
            resource_class,
            params: StageParams::new(),
            deterministic: true,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn non_deterministic(mut self) -> Self {
        self.deterministic = false;
        self
    }
}

/// Pipeline shape errors, caught before any task runs.
#[derive(Debug, Error)]
pub enum PipelineConfigError {
    #[error("Pipeline has no stages")]
    EmptyPipeline,

    #[error("Duplicate stage name: {0}")]
    DuplicateStage(String),

    #[error("First stage '{stage}' must consume {expected}, found {found}")]
    BadFirstStageInput {
        stage: String,
        expected: ArtifactKind,
        found: ArtifactKind,
    },

    #[error("Stage '{stage}' consumes {consumes} but upstream '{upstream}' produces {produces}")]
    KindMismatch {
        stage: String,
        consumes: ArtifactKind,
        upstream: String,
        produces: ArtifactKind,
    },

    #[error("No executor registered for stage '{0}'")]
    MissingExecutor(String),

    #[error("Stage '{stage}' requires a {class} slot but none are configured")]
    UnslottedResourceClass { stage: String, class: ResourceClass },
}

/// Classified failure returned by a stage executor.
///
/// Transient failures are retried with backoff; permanent ones fail the
/// task immediately.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageFailure {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl StageFailure {
    pub fn is_transient(&self) -> bool {
        matches!(self, StageFailure::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_spec_builder() {
        let spec = StageSpec::new(
            "transcribe",
            ArtifactKind::AudioTrack,
            ArtifactKind::Transcript,
            ResourceClass::GpuLarge,
        )
        .with_param("model", "large-v3")
        .with_param("language", "kn");

        assert_eq!(spec.name, "transcribe");
        assert_eq!(spec.params.get("model").map(String::as_str), Some("large-v3"));
        assert!(spec.deterministic);
    }

    #[test]
    fn test_non_deterministic_marker() {
        let spec = StageSpec::new(
            "synthesize",
            ArtifactKind::Translation,
            ArtifactKind::SynthesizedSpeech,
            ResourceClass::GpuLarge,
        )
        .non_deterministic();
        assert!(!spec.deterministic);
    }

    #[test]
    fn test_params_are_ordered() {
        let spec = StageSpec::new(
            "extract",
            ArtifactKind::Source,
            ArtifactKind::SourceSlice,
            ResourceClass::Cpu,
        )
        .with_param("z", "1")
        .with_param("a", "2");

        let keys: Vec<_> = spec.params.keys().cloned().collect();
        assert_eq!(keys, vec!["a", "z"]);
    }

    #[test]
    fn test_stage_spec_serialization() {
        let spec = StageSpec::new(
            "translate",
            ArtifactKind::Transcript,
            ArtifactKind::Translation,
            ResourceClass::GpuLarge,
        );
        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains("\"input\":\"transcript\""));
        assert!(json.contains("\"resource_class\":\"gpu_large\""));

        let deserialized: StageSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, spec);
    }

    #[test]
    fn test_failure_classification() {
        assert!(StageFailure::Transient("gpu oom".into()).is_transient());
        assert!(!StageFailure::Permanent("corrupt input".into()).is_transient());
    }
}
