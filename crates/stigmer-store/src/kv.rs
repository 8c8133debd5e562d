//! Resource store over an embedded sled engine
//!
//! Values are the serialized wire form of the resource; kind is a
//! first-class index key (one tree per kind) so listing is O(n) over one
//! kind only. Richer lookups (`find_by_slug`, `find_by_reference`) are
//! linear scans over the deserialized envelope, acceptable because the
//! local deployment is single-tenant and small.

use std::path::Path;
use thiserror::Error;

use stigmer_core::{normalize_slug, OwnerScope, Resource, ResourceKind, StigmerError};

/// Store-level error kinds of the C1 contract
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind}/{id} not found")]
    NotFound { kind: ResourceKind, id: String },

    #[error("{kind}/{id} already present")]
    Conflict { kind: ResourceKind, id: String },

    #[error("store io error: {0}")]
    Io(String),
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<StoreError> for StigmerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { kind, id } => StigmerError::not_found(kind.as_str(), id),
            StoreError::Conflict { kind, id } => StigmerError::already_exists(kind.as_str(), id),
            StoreError::Io(msg) => StigmerError::internal(msg),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Scoped-acquisition guard for the engine handle.
///
/// Opened once at process start; every component clones [`ResourceStore`]
/// handles from it. The guard is closed last during shutdown, after every
/// other component has released its references; no component closes the
/// engine directly.
pub struct StoreGuard {
    db: sled::Db,
}

impl StoreGuard {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db = sled::open(path.as_ref())?;
        tracing::debug!(path = %path.as_ref().display(), "resource store opened");
        Ok(Self { db })
    }

    pub fn store(&self) -> ResourceStore {
        ResourceStore {
            db: self.db.clone(),
        }
    }

    /// Flush and release the engine. Consumes the guard so a second close
    /// is unrepresentable.
    pub fn close(self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

/// Cheap-to-clone handle over the shared engine
#[derive(Clone)]
pub struct ResourceStore {
    db: sled::Db,
}

impl ResourceStore {
    /// Open a standalone store (tests and embedded CLI use)
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Ok(Self {
            db: sled::open(path.as_ref())?,
        })
    }

    fn tree(&self, kind: ResourceKind) -> StoreResult<sled::Tree> {
        Ok(self.db.open_tree(kind.as_str())?)
    }

    // ------------------------------------------------------------------
    // Raw byte API (the C1 contract surface)
    // ------------------------------------------------------------------

    pub fn get_raw(&self, kind: ResourceKind, id: &str) -> StoreResult<Vec<u8>> {
        match self.tree(kind)?.get(id.as_bytes())? {
            Some(bytes) => Ok(bytes.to_vec()),
            None => Err(StoreError::NotFound {
                kind,
                id: id.to_string(),
            }),
        }
    }

    pub fn save_raw(&self, kind: ResourceKind, id: &str, bytes: &[u8]) -> StoreResult<()> {
        self.tree(kind)?.insert(id.as_bytes(), bytes)?;
        Ok(())
    }

    /// Insert only when the key is absent
    pub fn save_raw_if_absent(
        &self,
        kind: ResourceKind,
        id: &str,
        bytes: &[u8],
    ) -> StoreResult<()> {
        let swapped = self
            .tree(kind)?
            .compare_and_swap(id.as_bytes(), None::<&[u8]>, Some(bytes))?;
        match swapped {
            Ok(()) => Ok(()),
            Err(_) => Err(StoreError::Conflict {
                kind,
                id: id.to_string(),
            }),
        }
    }

    pub fn delete(&self, kind: ResourceKind, id: &str) -> StoreResult<()> {
        match self.tree(kind)?.remove(id.as_bytes())? {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound {
                kind,
                id: id.to_string(),
            }),
        }
    }

    pub fn list_raw(&self, kind: ResourceKind) -> StoreResult<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        for entry in self.tree(kind)?.iter() {
            let (_, value) = entry?;
            out.push(value.to_vec());
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Typed API
    // ------------------------------------------------------------------

    pub fn get<R: Resource>(&self, id: &str) -> StoreResult<R> {
        let bytes = self.get_raw(R::KIND, id)?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Io(e.to_string()))
    }

    pub fn save<R: Resource>(&self, resource: &R) -> StoreResult<()> {
        let id = resource.metadata().id.clone();
        let bytes = serde_json::to_vec(resource).map_err(|e| StoreError::Io(e.to_string()))?;
        self.save_raw(R::KIND, &id, &bytes)
    }

    /// Ids sort by creation time, so the listing does too.
    pub fn list<R: Resource>(&self) -> StoreResult<Vec<R>> {
        let mut out = Vec::new();
        for bytes in self.list_raw(R::KIND)? {
            match serde_json::from_slice::<R>(&bytes) {
                Ok(r) => out.push(r),
                Err(e) => {
                    // One corrupt record must not poison the whole listing
                    tracing::warn!(kind = %R::KIND, error = %e, "skipping undecodable record");
                }
            }
        }
        Ok(out)
    }

    /// Slug lookup inside one `(owner_scope, org, kind)` namespace
    pub fn find_by_slug<R: Resource>(
        &self,
        scope: OwnerScope,
        org: &str,
        slug: &str,
    ) -> StoreResult<Option<R>> {
        for resource in self.list::<R>()? {
            let meta = resource.metadata();
            if meta.owner_scope == scope && meta.org == org && meta.slug == slug {
                return Ok(Some(resource));
            }
        }
        Ok(None)
    }

    /// Name lookup: accepts a display name or a slug, same namespace rules
    pub fn find_by_name<R: Resource>(
        &self,
        scope: OwnerScope,
        org: &str,
        name: &str,
    ) -> StoreResult<Option<R>> {
        self.find_by_slug(scope, org, &normalize_slug(name))
    }

    /// All resources whose extractor matches `value` (reference scans)
    pub fn find_by_reference<R, F>(&self, extract: F, value: &str) -> StoreResult<Vec<R>>
    where
        R: Resource,
        F: Fn(&R) -> Option<&str>,
    {
        Ok(self
            .list::<R>()?
            .into_iter()
            .filter(|r| extract(r) == Some(value))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stigmer_core::Skill;

    fn store() -> (tempfile::TempDir, ResourceStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ResourceStore::open(dir.path().join("data")).unwrap();
        (dir, store)
    }

    fn skill(id: &str, name: &str) -> Skill {
        let mut s = Skill::named(name);
        s.metadata.id = id.to_string();
        s.metadata.slug = normalize_slug(name);
        s
    }

    #[test]
    fn get_missing_is_not_found() {
        let (_dir, store) = store();
        let err = store.get::<Skill>("skl-missing").unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn save_then_get_round_trips() {
        let (_dir, store) = store();
        store.save(&skill("skl-1", "Code Analysis")).unwrap();
        let loaded: Skill = store.get("skl-1").unwrap();
        assert_eq!(loaded.metadata.name, "Code Analysis");
        assert_eq!(loaded.metadata.slug, "code-analysis");
    }

    #[test]
    fn listing_is_scoped_to_one_kind() {
        let (_dir, store) = store();
        store.save(&skill("skl-1", "a")).unwrap();
        store.save(&skill("skl-2", "b")).unwrap();
        assert_eq!(store.list::<Skill>().unwrap().len(), 2);
        assert!(store
            .list::<stigmer_core::Agent>()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn find_by_slug_respects_namespace() {
        let (_dir, store) = store();
        let mut s = skill("skl-1", "shared name");
        s.metadata.owner_scope = OwnerScope::Organization;
        s.metadata.org = "acme".to_string();
        store.save(&s).unwrap();

        let hit = store
            .find_by_slug::<Skill>(OwnerScope::Organization, "acme", "shared-name")
            .unwrap();
        assert!(hit.is_some());

        let miss = store
            .find_by_slug::<Skill>(OwnerScope::Organization, "globex", "shared-name")
            .unwrap();
        assert!(miss.is_none());
    }

    #[test]
    fn save_if_absent_conflicts_on_existing_key() {
        let (_dir, store) = store();
        store
            .save_raw_if_absent(ResourceKind::Skill, "skl-1", b"{}")
            .unwrap();
        let err = store
            .save_raw_if_absent(ResourceKind::Skill, "skl-1", b"{}")
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[test]
    fn delete_missing_is_not_found() {
        let (_dir, store) = store();
        let err = store.delete(ResourceKind::Skill, "skl-1").unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn metadata_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        {
            let guard = StoreGuard::open(&path).unwrap();
            guard.store().save(&skill("skl-1", "persisted")).unwrap();
            guard.close().unwrap();
        }
        let store = ResourceStore::open(&path).unwrap();
        let loaded: Skill = store.get("skl-1").unwrap();
        assert_eq!(loaded.metadata.name, "persisted");
    }
}
