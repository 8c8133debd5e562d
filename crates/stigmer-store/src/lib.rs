// Stigmer Store - Embedded resource store and content-addressed artifacts
//
// C1 (typed KV over sled) and C5 (SHA-256 artifact store with deterministic
// Skill packaging) live here; everything above them talks through these
// handles.

pub mod artifact;
pub mod kv;
pub mod package;

pub use artifact::{digest_bytes, short_digest, ArtifactStore};
pub use kv::{ResourceStore, StoreError, StoreGuard, StoreResult};
pub use package::{is_skill_dir, package_skill_dir, SKILL_MANIFEST};
