//! Filesystem-backed artifact store.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{payload_digest, Artifact, ArtifactError, ArtifactKey, ArtifactStore};

/// One file per artifact under a root directory, grouped by segment:
/// `<root>/seg-00003/transcribe-<fingerprint16>.bin`.
///
/// Conflict detection recomputes the stored payload's digest on every
/// colliding `put` rather than trusting metadata that could drift.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| ArtifactError::Storage(e.to_string()))?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &ArtifactKey) -> PathBuf {
        let fp_prefix = &key.fingerprint[..key.fingerprint.len().min(16)];
        self.root
            .join(format!("seg-{:05}", key.segment_id))
            .join(format!("{}-{}.bin", key.stage, fp_prefix))
    }

    fn read_payload(path: &Path) -> Result<Vec<u8>, ArtifactError> {
        fs::read(path).map_err(|e| ArtifactError::Storage(e.to_string()))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn put(&self, key: &ArtifactKey, payload: &[u8]) -> Result<(), ArtifactError> {
        let path = self.path_for(key);

        if path.exists() {
            let stored = Self::read_payload(&path)?;
            let stored_digest = payload_digest(&stored);
            let incoming_digest = payload_digest(payload);
            if stored_digest == incoming_digest {
                debug!("Artifact {} already stored, skipping write", key);
                return Ok(());
            }
            return Err(ArtifactError::Conflict {
                key: key.clone(),
                stored: stored_digest,
                incoming: incoming_digest,
            });
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ArtifactError::Storage(e.to_string()))?;
        }

        // Write through a uniquely named temp file so readers never
        // observe a partial payload and concurrent writers never step
        // on each other's temp file.
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        fs::write(&tmp, payload).map_err(|e| ArtifactError::Storage(e.to_string()))?;
        fs::rename(&tmp, &path).map_err(|e| ArtifactError::Storage(e.to_string()))?;

        debug!("Stored artifact {} ({} bytes)", key, payload.len());
        Ok(())
    }

    fn get(&self, key: &ArtifactKey) -> Result<Option<Artifact>, ArtifactError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }

        let payload = Self::read_payload(&path)?;
        let digest = payload_digest(&payload);
        let produced_at = fs::metadata(&path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(Some(Artifact {
            key: key.clone(),
            payload,
            digest,
            produced_at,
        }))
    }

    fn exists(&self, key: &ArtifactKey) -> Result<bool, ArtifactError> {
        Ok(self.path_for(key).exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FsArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path().join("artifacts")).unwrap();
        (dir, store)
    }

    fn key(segment: u32, stage: &str) -> ArtifactKey {
        ArtifactKey::new(
            segment,
            stage,
            format!("{:0>64}", format!("{}{}", stage, segment)),
        )
    }

    #[test]
    fn test_put_get_roundtrip() {
        let (_dir, store) = store();
        let k = key(0, "extract");

        store.put(&k, b"clip bytes").unwrap();
        let artifact = store.get(&k).unwrap().unwrap();
        assert_eq!(artifact.payload, b"clip bytes");
        assert_eq!(artifact.digest, payload_digest(b"clip bytes"));
    }

    #[test]
    fn test_missing_artifact() {
        let (_dir, store) = store();
        assert!(store.get(&key(3, "transcribe")).unwrap().is_none());
        assert!(!store.exists(&key(3, "transcribe")).unwrap());
    }

    #[test]
    fn test_identical_reput_is_noop() {
        let (_dir, store) = store();
        let k = key(1, "translate");
        store.put(&k, b"same").unwrap();
        store.put(&k, b"same").unwrap();
        assert_eq!(store.get(&k).unwrap().unwrap().payload, b"same");
    }

    #[test]
    fn test_divergent_reput_is_conflict() {
        let (_dir, store) = store();
        let k = key(1, "translate");
        store.put(&k, b"original").unwrap();

        let result = store.put(&k, b"divergent");
        assert!(matches!(result, Err(ArtifactError::Conflict { .. })));

        // The stored payload is untouched.
        assert_eq!(store.get(&k).unwrap().unwrap().payload, b"original");
    }

    #[test]
    fn test_keys_are_isolated() {
        let (_dir, store) = store();
        store.put(&key(0, "extract"), b"a").unwrap();
        store.put(&key(1, "extract"), b"b").unwrap();
        store.put(&key(0, "transcribe"), b"c").unwrap();

        assert_eq!(store.get(&key(0, "extract")).unwrap().unwrap().payload, b"a");
        assert_eq!(store.get(&key(1, "extract")).unwrap().unwrap().payload, b"b");
        assert_eq!(
            store.get(&key(0, "transcribe")).unwrap().unwrap().payload,
            b"c"
        );
    }

    #[test]
    fn test_exists_after_put() {
        let (_dir, store) = store();
        let k = key(2, "synthesize");
        assert!(!store.exists(&k).unwrap());
        store.put(&k, b"speech").unwrap();
        assert!(store.exists(&k).unwrap());
    }
}
