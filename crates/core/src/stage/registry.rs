//! Ordered stage registry with shape validation.

use std::collections::HashSet;

use super::{ArtifactKind, PipelineConfigError, StageSpec};

/// The validated, ordered list of pipeline stages.
///
/// Built once at startup; immutable afterwards. Validation guarantees
/// that every stage's input kind matches its upstream output kind and
/// that the first stage consumes the raw source.
#[derive(Debug, Clone)]
pub struct StageRegistry {
    stages: Vec<StageSpec>,
}

impl StageRegistry {
    pub fn new(specs: Vec<StageSpec>) -> Result<Self, PipelineConfigError> {
        if specs.is_empty() {
            return Err(PipelineConfigError::EmptyPipeline);
        }

        let mut names = HashSet::new();
        for spec in &specs {
            if !names.insert(spec.name.clone()) {
                return Err(PipelineConfigError::DuplicateStage(spec.name.clone()));
            }
        }

        let first = &specs[0];
        if first.input != ArtifactKind::Source {
            return Err(PipelineConfigError::BadFirstStageInput {
                stage: first.name.clone(),
                expected: ArtifactKind::Source,
                found: first.input,
            });
        }

        for pair in specs.windows(2) {
            let (upstream, stage) = (&pair[0], &pair[1]);
            if stage.input != upstream.output {
                return Err(PipelineConfigError::KindMismatch {
                    stage: stage.name.clone(),
                    consumes: stage.input,
                    upstream: upstream.name.clone(),
                    produces: upstream.output,
                });
            }
        }

        let mut stages = specs;
        for (i, spec) in stages.iter_mut().enumerate() {
            spec.ordinal = i as u32;
        }

        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&StageSpec> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn by_ordinal(&self, ordinal: u32) -> Option<&StageSpec> {
        self.stages.get(ordinal as usize)
    }

    /// The last stage, whose output feeds reassembly.
    pub fn final_stage(&self) -> &StageSpec {
        // Non-empty by construction.
        &self.stages[self.stages.len() - 1]
    }
}
