//! Content-addressed artifact storage.
//!
//! Every stage execution writes exactly one artifact, keyed by
//! (segment id, stage name, input fingerprint). The fingerprint chain
//! makes resumption a pure lookup: if the key already exists, the work
//! has been done with identical inputs and identical parameters.

mod fs_store;
mod store;

pub use fs_store::FsArtifactStore;
pub use store::{ArtifactError, ArtifactStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::segment::Segment;
use crate::stage::StageSpec;

/// Unique identity of one stage output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub segment_id: u32,
    pub stage: String,
    /// Hex sha2-256 over the stage's identity and its input chain.
    pub fingerprint: String,
}

impl ArtifactKey {
    pub fn new(segment_id: u32, stage: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            segment_id,
            stage: stage.into(),
            fingerprint: fingerprint.into(),
        }
    }
}

impl std::fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}@{}",
            self.segment_id,
            self.stage,
            &self.fingerprint[..self.fingerprint.len().min(12)]
        )
    }
}

/// A stored stage output.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub key: ArtifactKey,
    pub payload: Vec<u8>,
    /// Hex sha2-256 of the payload, used for conflict detection.
    pub digest: String,
    pub produced_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(key: ArtifactKey, payload: Vec<u8>) -> Self {
        let digest = payload_digest(&payload);
        Self {
            key,
            payload,
            digest,
            produced_at: Utc::now(),
        }
    }
}

/// Hex sha2-256 of a payload.
pub fn payload_digest(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hex(&hasher.finalize())
}

/// Fingerprint for a first-stage task: derived from the stage identity,
/// the source reference and the segment bounds.
pub fn source_fingerprint(stage: &StageSpec, segment: &Segment, run_salt: &str) -> String {
    let mut hasher = Sha256::new();
    hash_stage_identity(&mut hasher, stage, run_salt);
    hasher.update(segment.source.uri.as_bytes());
    hasher.update(segment.start_secs.to_bits().to_be_bytes());
    hasher.update(segment.end_secs.to_bits().to_be_bytes());
    hex(&hasher.finalize())
}

/// Fingerprint for a downstream task: derived from the stage identity
/// and the upstream output fingerprint.
pub fn chained_fingerprint(stage: &StageSpec, upstream_fingerprint: &str, run_salt: &str) -> String {
    let mut hasher = Sha256::new();
    hash_stage_identity(&mut hasher, stage, run_salt);
    hasher.update(upstream_fingerprint.as_bytes());
    hex(&hasher.finalize())
}

fn hash_stage_identity(hasher: &mut Sha256, stage: &StageSpec, run_salt: &str) {
    hasher.update(stage.name.as_bytes());
    hasher.update([0u8]);
    // BTreeMap iteration is ordered, so the parameter encoding is stable.
    for (key, value) in &stage.params {
        hasher.update(key.as_bytes());
        hasher.update([b'=']);
        hasher.update(value.as_bytes());
        hasher.update([b';']);
    }
    if !stage.deterministic {
        hasher.update(run_salt.as_bytes());
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
