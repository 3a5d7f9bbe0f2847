//! Output reassembly.
//!
//! Concatenates final-stage payloads in ascending segment id order.
//! The mode is an explicit choice: strict refuses to produce output
//! with holes, best-effort skips failed segments and says which.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::artifact::{ArtifactError, ArtifactStore};
use crate::metrics;
use crate::orchestrator::RunReport;

#[derive(Debug, Error)]
pub enum ReassemblyError {
    /// Strict mode and at least one segment has no final artifact.
    #[error("Incomplete output: segments {missing:?} have no final artifact")]
    IncompleteOutput { missing: Vec<u32> },

    /// A report entry pointed at an artifact the store no longer holds.
    #[error("Final artifact for segment {segment_id} vanished from the store")]
    MissingArtifact { segment_id: u32 },

    #[error("Artifact store error: {0}")]
    Artifact(#[from] ArtifactError),
}

/// Reassembly behaviour when segments failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReassemblyMode {
    /// Refuse to emit output unless every segment completed.
    Strict,
    /// Emit the completed segments, reporting the skipped ones.
    BestEffort,
}

/// The assembled output and what went into it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReassembledOutput {
    pub payload: Vec<u8>,
    /// Segment ids included, in output order.
    pub included: Vec<u32>,
    /// Segment ids skipped (always empty in strict mode).
    pub skipped: Vec<u32>,
}

pub struct Reassembler {
    artifact_store: Arc<dyn ArtifactStore>,
    mode: ReassemblyMode,
}

impl Reassembler {
    pub fn new(artifact_store: Arc<dyn ArtifactStore>, mode: ReassemblyMode) -> Self {
        Self {
            artifact_store,
            mode,
        }
    }

    pub fn mode(&self) -> ReassemblyMode {
        self.mode
    }

    /// Assemble the run's output from its report.
    ///
    /// Deterministic: the same report and store contents produce
    /// byte-identical output.
    pub fn reassemble(&self, report: &RunReport) -> Result<ReassembledOutput, ReassemblyError> {
        let missing: Vec<u32> = report
            .segments
            .iter()
            .filter(|s| s.final_artifact.is_none())
            .map(|s| s.segment_id)
            .collect();

        if !missing.is_empty() && self.mode == ReassemblyMode::Strict {
            metrics::REASSEMBLIES.with_label_values(&["failed"]).inc();
            return Err(ReassemblyError::IncompleteOutput { missing });
        }

        let mut payload = Vec::new();
        let mut included = Vec::new();

        // Report segments are already in ascending id order; keep the
        // iteration explicit anyway since output bytes depend on it.
        let mut entries: Vec<_> = report.segments.iter().collect();
        entries.sort_by_key(|s| s.segment_id);

        for entry in entries {
            let Some(key) = &entry.final_artifact else {
                warn!("Skipping segment {} in reassembly", entry.segment_id);
                continue;
            };
            let artifact = self
                .artifact_store
                .get(key)?
                .ok_or(ReassemblyError::MissingArtifact {
                    segment_id: entry.segment_id,
                })?;
            payload.extend_from_slice(&artifact.payload);
            included.push(entry.segment_id);
        }

        let result_label = if missing.is_empty() { "complete" } else { "partial" };
        metrics::REASSEMBLIES.with_label_values(&[result_label]).inc();
        info!(
            "Reassembled {} segments ({} bytes), {} skipped",
            included.len(),
            payload.len(),
            missing.len()
        );

        Ok(ReassembledOutput {
            payload,
            included,
            skipped: missing,
        })
    }
}
