//! Content-addressed artifact store
//!
//! Skill artifacts are zips keyed by the SHA-256 of their bytes. Pushing
//! identical bytes reuses the existing entry; symbolic tags (`latest` by
//! default) map names to digests with last-writer-wins semantics. Deleting
//! a Skill resource never deletes its artifact here; a reference-counted
//! sweep is part of the contract but has no cadence yet, so stale digests
//! accumulate.

use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use crate::kv::{StoreError, StoreResult};

/// Hex SHA-256 of artifact bytes; also the Skill's version identity
pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Short digest prefix used in version tags like `v1-<short>`
pub fn short_digest(digest: &str) -> &str {
    &digest[..digest.len().min(12)]
}

/// Flat content-addressed directory: `<root>/<hex-digest>`
#[derive(Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(Self { root })
    }

    fn path_for(&self, digest: &str) -> PathBuf {
        self.root.join(digest)
    }

    pub fn contains(&self, digest: &str) -> bool {
        self.path_for(digest).is_file()
    }

    /// Store `bytes`, returning `(digest, already_present)`
    pub fn put(&self, bytes: &[u8]) -> StoreResult<(String, bool)> {
        let digest = digest_bytes(bytes);
        let path = self.path_for(&digest);
        if path.is_file() {
            tracing::debug!(%digest, "artifact already present, reusing");
            return Ok((digest, true));
        }

        // Write through a temp name so a crash never leaves a torn artifact
        // under its final digest key.
        let tmp = self.root.join(format!(".tmp-{digest}"));
        fs::write(&tmp, bytes).map_err(|e| StoreError::Io(e.to_string()))?;
        fs::rename(&tmp, &path).map_err(|e| StoreError::Io(e.to_string()))?;
        tracing::debug!(%digest, size = bytes.len(), "artifact stored");
        Ok((digest, false))
    }

    pub fn get(&self, digest: &str) -> StoreResult<Vec<u8>> {
        let path = self.path_for(digest);
        if !path.is_file() {
            return Err(StoreError::Io(format!("artifact {digest} not present")));
        }
        fs::read(&path).map_err(|e| StoreError::Io(e.to_string()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_is_idempotent_on_identical_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();

        let (d1, existed1) = store.put(b"artifact body").unwrap();
        let (d2, existed2) = store.put(b"artifact body").unwrap();
        assert_eq!(d1, d2);
        assert!(!existed1);
        assert!(existed2);
        assert_eq!(store.get(&d1).unwrap(), b"artifact body");
    }

    #[test]
    fn different_bytes_get_different_digests() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let (d1, _) = store.put(b"v1").unwrap();
        let (d2, _) = store.put(b"v2").unwrap();
        assert_ne!(d1, d2);
    }

    #[test]
    fn digest_is_hex_sha256() {
        let digest = digest_bytes(b"");
        assert_eq!(
            digest,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(short_digest(&digest), "e3b0c44298fc");
    }
}
