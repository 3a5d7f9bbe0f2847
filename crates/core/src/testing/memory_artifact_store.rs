//! In-memory artifact store for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::artifact::{payload_digest, Artifact, ArtifactError, ArtifactKey, ArtifactStore};

/// HashMap-backed store with the same conflict semantics as the
/// filesystem store.
#[derive(Default)]
pub struct MemoryArtifactStore {
    artifacts: RwLock<HashMap<ArtifactKey, Artifact>>,
    puts: AtomicU64,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `put` calls that actually stored a new artifact.
    pub fn stored_count(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.artifacts.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn put(&self, key: &ArtifactKey, payload: &[u8]) -> Result<(), ArtifactError> {
        let mut artifacts = self.artifacts.write().unwrap();
        if let Some(existing) = artifacts.get(key) {
            let incoming = payload_digest(payload);
            if existing.digest == incoming {
                return Ok(());
            }
            return Err(ArtifactError::Conflict {
                key: key.clone(),
                stored: existing.digest.clone(),
                incoming,
            });
        }
        artifacts.insert(key.clone(), Artifact::new(key.clone(), payload.to_vec()));
        self.puts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn get(&self, key: &ArtifactKey) -> Result<Option<Artifact>, ArtifactError> {
        Ok(self.artifacts.read().unwrap().get(key).cloned())
    }

    fn exists(&self, key: &ArtifactKey) -> Result<bool, ArtifactError> {
        Ok(self.artifacts.read().unwrap().contains_key(key))
    }
}
