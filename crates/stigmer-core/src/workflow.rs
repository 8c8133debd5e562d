// Stigmer Core - Workflow resource family
//
// Workflow is a template document with an ordered task list; an Instance
// binds it to an environment; an Execution is one run of an Instance.
// Signals are named events published against a running execution.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::agent::EnvSpec;
use crate::execution::ExecutionStatus;
use crate::metadata::Metadata;
use crate::resource::{ExecutionPhase, Phased, Resource, ResourceKind};
use crate::task::Task;

// ============================================================================
// Workflow
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub metadata: Metadata,
    pub spec: WorkflowSpec,
    #[serde(default)]
    pub status: WorkflowStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub document: WorkflowDocument,

    /// Ordered task list; must be non-empty
    #[serde(default)]
    pub tasks: Vec<Task>,

    #[serde(default, skip_serializing_if = "EnvSpec::is_empty")]
    pub env_spec: EnvSpec,
}

/// Identity block of the workflow document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowDocument {
    #[serde(default)]
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowStatus {
    /// Pointer to the auto-created default instance; may go stale after a
    /// partial failure (the child's slug is the canonical locator).
    #[serde(default)]
    pub default_instance_id: String,
}

impl Workflow {
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            metadata: Metadata::named(name.clone()),
            spec: WorkflowSpec {
                document: WorkflowDocument {
                    namespace: "default".to_string(),
                    name,
                    version: None,
                },
                tasks: Vec::new(),
                env_spec: EnvSpec::default(),
            },
            status: WorkflowStatus::default(),
        }
    }
}

impl Resource for Workflow {
    const KIND: ResourceKind = ResourceKind::Workflow;

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    fn validate_spec(&self) -> Result<(), String> {
        if self.metadata.name.trim().is_empty() {
            return Err("workflow name must not be empty".to_string());
        }
        if self.spec.document.name.trim().is_empty() {
            return Err("workflow document name must not be empty".to_string());
        }
        if self.spec.tasks.is_empty() {
            return Err("workflow must declare at least one task".to_string());
        }
        for task in &self.spec.tasks {
            task.validate()?;
        }
        Ok(())
    }

    fn merge_spec_from(&mut self, other: &Self) {
        self.spec = other.spec.clone();
    }
}

// ============================================================================
// WorkflowInstance
// ============================================================================

/// Concrete binding (environment, secrets) of a Workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub metadata: Metadata,
    pub spec: WorkflowInstanceSpec,
    #[serde(default)]
    pub status: WorkflowInstanceStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowInstanceSpec {
    /// Must reference an existing Workflow
    pub workflow_id: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment_refs: Vec<String>,

    /// Secret values bound at instance level, merged over env_spec
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub secrets: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowInstanceStatus {}

impl Resource for WorkflowInstance {
    const KIND: ResourceKind = ResourceKind::WorkflowInstance;

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    fn validate_spec(&self) -> Result<(), String> {
        if self.spec.workflow_id.trim().is_empty() {
            return Err("workflow instance must reference a workflow".to_string());
        }
        Ok(())
    }

    fn merge_spec_from(&mut self, other: &Self) {
        self.spec = other.spec.clone();
    }
}

// ============================================================================
// WorkflowExecution
// ============================================================================

/// A request to run a WorkflowInstance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub metadata: Metadata,
    pub spec: WorkflowExecutionSpec,
    #[serde(default)]
    pub status: ExecutionStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowExecutionSpec {
    /// The instance to run. May be empty when `workflow_id` is set; the
    /// create pipeline then resolves the workflow's default instance.
    #[serde(default)]
    pub instance_id: String,

    /// Parent workflow, used to resolve the default instance when no
    /// instance is named
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub workflow_id: String,

    /// Initial context variables
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub input: HashMap<String, serde_json::Value>,

    /// Free-text message made available to agent tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Set by the orchestrator when a child activity should complete this
    /// execution asynchronously
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_token: Option<String>,
}

impl Resource for WorkflowExecution {
    const KIND: ResourceKind = ResourceKind::WorkflowExecution;

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    fn validate_spec(&self) -> Result<(), String> {
        if self.spec.instance_id.trim().is_empty() && self.spec.workflow_id.trim().is_empty() {
            return Err("workflow execution must reference an instance or a workflow".to_string());
        }
        Ok(())
    }

    fn merge_spec_from(&mut self, other: &Self) {
        self.spec = other.spec.clone();
    }
}

impl Phased for WorkflowExecution {
    fn phase(&self) -> ExecutionPhase {
        self.status.phase
    }

    fn transition(&mut self, next: ExecutionPhase) -> bool {
        if self.status.phase.is_terminal() {
            return false;
        }
        if !self.status.phase.can_transition_to(next) {
            return false;
        }
        self.status.phase = next;
        if next == ExecutionPhase::InProgress && self.status.start_at.is_none() {
            self.status.start_at = Some(chrono::Utc::now());
        }
        if next.is_terminal() {
            self.status.end_at = Some(chrono::Utc::now());
        }
        true
    }

    fn reset(&mut self) {
        self.status.phase = ExecutionPhase::Pending;
        self.status.start_at = None;
        self.status.end_at = None;
    }

    fn status_message(&self) -> &str {
        &self.status.message
    }

    fn set_status_message(&mut self, message: impl Into<String>) {
        self.status.message = message.into();
    }

    fn upsert_task(&mut self, progress: crate::execution::TaskProgress) {
        self.status.upsert_task(progress);
    }
}

// ============================================================================
// Signal
// ============================================================================

/// A named event published against a running WorkflowExecution.
/// Wakes Listen tasks; delivery is at-least-once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub metadata: Metadata,
    pub spec: SignalSpec,
    #[serde(default)]
    pub status: SignalStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalSpec {
    pub execution_id: String,
    pub signal_name: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalStatus {}

impl Resource for Signal {
    const KIND: ResourceKind = ResourceKind::Signal;

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    fn validate_spec(&self) -> Result<(), String> {
        if self.spec.execution_id.trim().is_empty() {
            return Err("signal must reference a workflow execution".to_string());
        }
        if self.spec.signal_name.trim().is_empty() {
            return Err("signal name must not be empty".to_string());
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
    use crate::task::{SetConfig, TaskKind};

    #[test]
    fn workflow_requires_tasks() {
        let wf = Workflow::named("empty");
        assert!(wf.validate_spec().is_err());
    }

    #[test]
    fn workflow_with_task_validates() {
        let mut wf = Workflow::named("set-one");
        wf.spec.tasks.push(Task {
            name: "init".to_string(),
            kind: TaskKind::Set(SetConfig {
                variables: [("a".to_string(), serde_json::json!(1))].into_iter().collect(),
            }),
        });
        assert!(wf.validate_spec().is_ok());
    }
}
