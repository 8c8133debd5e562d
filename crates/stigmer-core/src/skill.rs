// Stigmer Core - Skill resource
//
// Skills are artifact-centric leaves of the dependency graph. The spec
// carries only a description and a digest; the markdown body and supporting
// files live in the artifact store under that digest.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::metadata::Metadata;
use crate::resource::{Resource, ResourceKind};

/// Tag every Skill carries; resolved at call time when no tag is named.
pub const LATEST_TAG: &str = "latest";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub metadata: Metadata,
    pub spec: SkillSpec,
    #[serde(default)]
    pub status: SkillStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillSpec {
    #[serde(default)]
    pub description: String,

    /// SHA-256 of the current artifact zip; also the Skill's version identity
    #[serde(default)]
    pub artifact_digest: String,

    /// Symbolic tag → digest. Always contains at least `latest`.
    /// Tag writes are last-writer-wins.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillStatus {}

impl Skill {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            metadata: Metadata::named(name),
            spec: SkillSpec::default(),
            status: SkillStatus::default(),
        }
    }

    /// Resolve a symbolic tag to a digest. `None` tag means `latest`.
    pub fn resolve_tag(&self, tag: Option<&str>) -> Option<&str> {
        let tag = tag.unwrap_or(LATEST_TAG);
        self.spec.tags.get(tag).map(|s| s.as_str())
    }

    /// Point `tag` at `digest`, and keep `artifact_digest` tracking `latest`.
    pub fn set_tag(&mut self, tag: impl Into<String>, digest: impl Into<String>) {
        let tag = tag.into();
        let digest = digest.into();
        if tag == LATEST_TAG {
            self.spec.artifact_digest = digest.clone();
        }
        self.spec.tags.insert(tag, digest);
    }
}

impl Resource for Skill {
    const KIND: ResourceKind = ResourceKind::Skill;

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    fn validate_spec(&self) -> Result<(), String> {
        if self.metadata.name.trim().is_empty() {
            return Err("skill name must not be empty".to_string());
        }
        Ok(())
    }

    fn merge_spec_from(&mut self, other: &Self) {
        self.spec = other.spec.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_tag_defaults_to_latest() {
        let mut skill = Skill::named("code-analysis");
        skill.set_tag(LATEST_TAG, "d1");
        skill.set_tag("v1-abc123", "d0");

        assert_eq!(skill.resolve_tag(None), Some("d1"));
        assert_eq!(skill.resolve_tag(Some("v1-abc123")), Some("d0"));
        assert_eq!(skill.resolve_tag(Some("missing")), None);
    }

    #[test]
    fn latest_tag_tracks_artifact_digest() {
        let mut skill = Skill::named("code-analysis");
        skill.set_tag(LATEST_TAG, "d1");
        assert_eq!(skill.spec.artifact_digest, "d1");

        // last-writer-wins
        skill.set_tag(LATEST_TAG, "d2");
        assert_eq!(skill.spec.artifact_digest, "d2");
        assert_eq!(skill.resolve_tag(None), Some("d2"));
    }
}
