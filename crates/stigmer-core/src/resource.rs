// Stigmer Core - Resource kind index, the Resource trait, and execution phases

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::metadata::{Metadata, OwnerScope};

/// Every persistable resource kind. Kind is a first-class index key in the
/// store, so listing one kind never scans another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Skill,
    Agent,
    AgentInstance,
    AgentExecution,
    Workflow,
    WorkflowInstance,
    WorkflowExecution,
    Signal,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Skill => "skill",
            ResourceKind::Agent => "agent",
            ResourceKind::AgentInstance => "agent-instance",
            ResourceKind::AgentExecution => "agent-execution",
            ResourceKind::Workflow => "workflow",
            ResourceKind::WorkflowInstance => "workflow-instance",
            ResourceKind::WorkflowExecution => "workflow-execution",
            ResourceKind::Signal => "signal",
        }
    }

    /// Prefix used when minting ids for this kind
    pub fn id_prefix(&self) -> &'static str {
        match self {
            ResourceKind::Skill => "skl",
            ResourceKind::Agent => "agt",
            ResourceKind::AgentInstance => "agi",
            ResourceKind::AgentExecution => "age",
            ResourceKind::Workflow => "wf",
            ResourceKind::WorkflowInstance => "wfi",
            ResourceKind::WorkflowExecution => "wfe",
            ResourceKind::Signal => "sig",
        }
    }

    pub fn all() -> &'static [ResourceKind] {
        &[
            ResourceKind::Skill,
            ResourceKind::Agent,
            ResourceKind::AgentInstance,
            ResourceKind::AgentExecution,
            ResourceKind::Workflow,
            ResourceKind::WorkflowInstance,
            ResourceKind::WorkflowExecution,
            ResourceKind::Signal,
        ]
    }

    /// Parse the user-facing kind name (CLI `get`/`list` argument)
    pub fn parse(s: &str) -> Option<ResourceKind> {
        let normalized = s.trim().to_ascii_lowercase();
        ResourceKind::all()
            .iter()
            .copied()
            .find(|k| k.as_str() == normalized || format!("{}s", k.as_str()) == normalized)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A typed reference to another resource, resolvable via GetByReference.
///
/// For Skills, `version_tag` selects a digest through the tag map; absent
/// means `latest`, resolved at call time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub name: String,
    #[serde(default)]
    pub scope: OwnerScope,
    #[serde(default)]
    pub org: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_tag: Option<String>,
}

impl ResourceRef {
    pub fn skill(name: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Skill,
            name: name.into(),
            scope: OwnerScope::default(),
            org: String::new(),
            version_tag: None,
        }
    }

    pub fn agent(name: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Agent,
            name: name.into(),
            scope: OwnerScope::default(),
            org: String::new(),
            version_tag: None,
        }
    }

    pub fn with_version_tag(mut self, tag: impl Into<String>) -> Self {
        self.version_tag = Some(tag.into());
        self
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// Trait implemented by every resource kind struct
pub trait Resource:
    Clone + Send + Sync + Serialize + DeserializeOwned + fmt::Debug + 'static
{
    const KIND: ResourceKind;

    fn metadata(&self) -> &Metadata;
    fn metadata_mut(&mut self) -> &mut Metadata;

    /// Structural and field-constraint validation of the spec.
    /// Returns a human-readable reason on failure.
    fn validate_spec(&self) -> Result<(), String> {
        Ok(())
    }

    /// Replace spec fields from `other` during an update, leaving metadata
    /// and status to the pipeline.
    fn merge_spec_from(&mut self, other: &Self);
}

/// Lifecycle phase of an execution. Terminal phases are absorbing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionPhase {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionPhase::Completed | ExecutionPhase::Failed | ExecutionPhase::Cancelled
        )
    }

    /// Phase transitions form a DAG:
    /// PENDING → IN_PROGRESS → {COMPLETED, FAILED, CANCELLED}.
    /// PENDING may also fail or cancel directly.
    pub fn can_transition_to(&self, next: ExecutionPhase) -> bool {
        if *self == next {
            return true;
        }
        match self {
            ExecutionPhase::Pending => next != ExecutionPhase::Pending,
            ExecutionPhase::InProgress => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionPhase::Pending => "PENDING",
            ExecutionPhase::InProgress => "IN_PROGRESS",
            ExecutionPhase::Completed => "COMPLETED",
            ExecutionPhase::Failed => "FAILED",
            ExecutionPhase::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

/// Implemented by the two execution kinds; lets generic pipeline steps and
/// the orchestrator act on phases without knowing the concrete type.
pub trait Phased {
    fn phase(&self) -> ExecutionPhase;

    /// Apply a phase transition. Terminal phases absorb: a transition out of
    /// a terminal phase is silently ignored and `false` is returned.
    fn transition(&mut self, next: ExecutionPhase) -> bool;

    /// Force the record back to PENDING with cleared timestamps. Only the
    /// create pipeline calls this, before the first persist.
    fn reset(&mut self);

    fn status_message(&self) -> &str;
    fn set_status_message(&mut self, message: impl Into<String>);

    /// Record per-task progress, replacing an earlier entry of the same name
    fn upsert_task(&mut self, progress: crate::execution::TaskProgress);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_dag_allows_forward_edges_only() {
        use ExecutionPhase::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(Pending.can_transition_to(Failed));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(InProgress));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Completed));
    }

    #[test]
    fn terminal_phases_are_terminal() {
        use ExecutionPhase::*;
        for p in [Completed, Failed, Cancelled] {
            assert!(p.is_terminal());
        }
        for p in [Pending, InProgress] {
            assert!(!p.is_terminal());
        }
    }

    #[test]
    fn kind_parse_accepts_plural() {
        assert_eq!(ResourceKind::parse("workflow"), Some(ResourceKind::Workflow));
        assert_eq!(ResourceKind::parse("workflows"), Some(ResourceKind::Workflow));
        assert_eq!(ResourceKind::parse("Skill"), Some(ResourceKind::Skill));
        assert_eq!(ResourceKind::parse("nope"), None);
    }

    #[test]
    fn phase_serializes_screaming_snake() {
        let json = serde_json::to_string(&ExecutionPhase::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
    }
}
