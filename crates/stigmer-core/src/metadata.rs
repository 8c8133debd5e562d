// Stigmer Core - Resource metadata envelope
//
// Every resource shares the same metadata block. Two invariants live here:
// - slug is a pure normalization of name, unique within (scope, org, kind)
// - id is assigned once at creation and sorts by creation time

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Ownership scope of a resource
///
/// Cross-scope references obey one business rule: an organization-scoped
/// child may only reference an organization-scoped parent of the same org.
/// Platform- and user-scoped parents are exempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerScope {
    Platform,
    Organization,
    #[default]
    User,
}

impl fmt::Display for OwnerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerScope::Platform => write!(f, "platform"),
            OwnerScope::Organization => write!(f, "organization"),
            OwnerScope::User => write!(f, "user"),
        }
    }
}

/// Common metadata carried by every resource kind
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    /// Opaque, immutable, monotonically sortable id. Empty until creation.
    #[serde(default)]
    pub id: String,

    /// Human-chosen display name
    pub name: String,

    /// Normalized identifier, derived from name. Unique per (scope, org, kind).
    #[serde(default)]
    pub slug: String,

    /// Owning organization (empty for user/platform scope without one)
    #[serde(default)]
    pub org: String,

    #[serde(default)]
    pub owner_scope: OwnerScope,

    /// Free-form annotations, not indexed
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_by: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub updated_by: String,
}

impl Metadata {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Derive a slug from a display name.
///
/// Lowercases, keeps alphanumeric runs, and joins them with single dashes.
/// The function is pure: the same name always yields the same slug.
pub fn normalize_slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Generate a sortable resource id: `<prefix>-<millis>-<jitter>`.
///
/// The millisecond clock makes ids sort by creation time; the jitter keeps
/// ids unique when two resources are created in the same millisecond.
pub fn generate_id(prefix: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let jitter: u32 = rand::thread_rng().gen_range(0..0xffff_ff);
    format!("{prefix}-{millis:013}-{jitter:06x}")
}

/// Canonical slug of a parent's auto-created default child instance
pub fn default_instance_slug(parent_slug: &str) -> String {
    format!("{parent_slug}-default")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_normalization_is_pure() {
        assert_eq!(normalize_slug("Code Reviewer"), "code-reviewer");
        assert_eq!(normalize_slug("  API -- gateway  "), "api-gateway");
        assert_eq!(normalize_slug("already-a-slug"), "already-a-slug");
        assert_eq!(normalize_slug("Ünicode Névér"), "nicode-nvr");
        assert_eq!(normalize_slug("Code Reviewer"), normalize_slug("Code Reviewer"));
    }

    #[test]
    fn slug_has_no_leading_or_trailing_dash() {
        assert_eq!(normalize_slug("--edge--"), "edge");
        assert_eq!(normalize_slug("!!!"), "");
    }

    #[test]
    fn ids_sort_by_creation_time() {
        let a = generate_id("wf");
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = generate_id("wf");
        assert!(a < b, "{a} should sort before {b}");
    }

    #[test]
    fn default_instance_slug_uses_parent_slug() {
        assert_eq!(default_instance_slug("code-reviewer"), "code-reviewer-default");
    }
}
