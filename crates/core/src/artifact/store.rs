//! Artifact store trait.

use thiserror::Error;

use super::{Artifact, ArtifactKey};

#[derive(Debug, Error)]
pub enum ArtifactError {
    /// The key already holds a payload with a different digest. This is
    /// always a bug upstream (fingerprint collision or impure stage
    /// declared deterministic), never silently overwritten.
    #[error("Artifact conflict at {key}: stored digest {stored}, incoming {incoming}")]
    Conflict {
        key: ArtifactKey,
        stored: String,
        incoming: String,
    },

    #[error("Artifact storage error: {0}")]
    Storage(String),
}

/// Write-once keyed storage for stage outputs.
///
/// `put` with an identical payload is a no-op, so retried and
/// duplicated work converges instead of failing. `exists` is the
/// resumption primitive: a present key means the work is done.
pub trait ArtifactStore: Send + Sync {
    /// Store a payload under a key. Idempotent for identical payloads;
    /// conflicting payloads return [`ArtifactError::Conflict`].
    fn put(&self, key: &ArtifactKey, payload: &[u8]) -> Result<(), ArtifactError>;

    /// Fetch an artifact, `None` if absent.
    fn get(&self, key: &ArtifactKey) -> Result<Option<Artifact>, ArtifactError>;

    /// Cheap presence check.
    fn exists(&self, key: &ArtifactKey) -> Result<bool, ArtifactError>;
}
