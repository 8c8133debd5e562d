// Stigmer Core - Agent resource family
//
// Agent is a template with no side effects until materialized as an
// AgentInstance; AgentExecution is one runtime invocation of an Agent.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::execution::{ExecutionConfig, ExecutionStatus};
use crate::metadata::Metadata;
use crate::resource::{ExecutionPhase, Phased, Resource, ResourceKind, ResourceRef};

// ============================================================================
// Agent
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub metadata: Metadata,
    pub spec: AgentSpec,
    #[serde(default)]
    pub status: AgentStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Plain-text system instructions
    pub instructions: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub icon: String,

    /// Skills this agent loads at run time
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skill_refs: Vec<ResourceRef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mcp_servers: Vec<McpServer>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_agents: Vec<SubAgent>,

    #[serde(default, skip_serializing_if = "EnvSpec::is_empty")]
    pub env_spec: EnvSpec,
}

/// MCP server attachment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServer {
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub transport: McpTransport,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpTransport {
    #[default]
    Stdio,
    Http,
}

/// A sub-agent is either declared inline or references an existing Agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubAgent {
    Ref(ResourceRef),
    Inline {
        name: String,
        spec: Box<AgentSpec>,
    },
}

/// Runtime environment requirements merged into an instance's env
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvSpec {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    /// Names of secrets the instance binding must supply
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<String>,
}

impl EnvSpec {
    pub fn is_empty(&self) -> bool {
        self.env.is_empty() && self.secrets.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentStatus {
    /// Pointer to the auto-created default instance. May go stale after a
    /// partial failure; the child's slug is the canonical locator.
    #[serde(default)]
    pub default_instance_id: String,
}

impl Agent {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            metadata: Metadata::named(name),
            spec: AgentSpec::default(),
            status: AgentStatus::default(),
        }
    }
}

impl Resource for Agent {
    const KIND: ResourceKind = ResourceKind::Agent;

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    fn validate_spec(&self) -> Result<(), String> {
        if self.metadata.name.trim().is_empty() {
            return Err("agent name must not be empty".to_string());
        }
        if self.spec.instructions.trim().is_empty() {
            return Err("agent instructions must not be empty".to_string());
        }
        for skill in &self.spec.skill_refs {
            if skill.kind != ResourceKind::Skill {
                return Err(format!(
                    "skill_refs may only reference skills, got {}",
                    skill.kind
                ));
            }
        }
        Ok(())
    }

    fn merge_spec_from(&mut self, other: &Self) {
        self.spec = other.spec.clone();
    }
}

// ============================================================================
// AgentInstance
// ============================================================================

/// Materialization of an Agent in an environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInstance {
    pub metadata: Metadata,
    pub spec: AgentInstanceSpec,
    #[serde(default)]
    pub status: AgentInstanceStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentInstanceSpec {
    /// Must reference an existing Agent
    pub agent_id: String,

    /// Runtime env bundles merged into the agent's env_spec
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment_refs: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentInstanceStatus {}

impl Resource for AgentInstance {
    const KIND: ResourceKind = ResourceKind::AgentInstance;

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    fn validate_spec(&self) -> Result<(), String> {
        if self.spec.agent_id.trim().is_empty() {
            return Err("agent instance must reference an agent".to_string());
        }
        Ok(())
    }

    fn merge_spec_from(&mut self, other: &Self) {
        self.spec = other.spec.clone();
    }
}

// ============================================================================
// AgentExecution
// ============================================================================

/// A request to run an Agent once
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecution {
    pub metadata: Metadata,
    pub spec: AgentExecutionSpec,
    #[serde(default)]
    pub status: ExecutionStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentExecutionSpec {
    /// Conversation session for workspace reuse
    #[serde(default)]
    pub session_id: String,

    pub agent_id: String,

    /// User message handed to the agent
    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub execution_config: ExecutionConfig,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub runtime_env: HashMap<String, String>,

    /// Engine task token to complete when this execution reaches a terminal
    /// phase. Absent for direct (non-workflow) executions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_token: Option<String>,
}

impl Resource for AgentExecution {
    const KIND: ResourceKind = ResourceKind::AgentExecution;

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    fn validate_spec(&self) -> Result<(), String> {
        if self.spec.agent_id.trim().is_empty() {
            return Err("agent execution must reference an agent".to_string());
        }
        Ok(())
    }

    fn merge_spec_from(&mut self, other: &Self) {
        self.spec = other.spec.clone();
    }
}

impl Phased for AgentExecution {
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

#[cfg(test)]
mod tests {
    use super::*;

    fn execution() -> AgentExecution {
        AgentExecution {
            metadata: Metadata::named("run"),
            spec: AgentExecutionSpec {
                agent_id: "agt-1".to_string(),
                ..Default::default()
            },
            status: ExecutionStatus::default(),
        }
    }

    #[test]
    fn terminal_phase_absorbs() {
        let mut exec = execution();
        assert!(exec.transition(ExecutionPhase::InProgress));
        assert!(exec.transition(ExecutionPhase::Completed));
        assert!(!exec.transition(ExecutionPhase::Failed));
        assert_eq!(exec.phase(), ExecutionPhase::Completed);
        assert!(exec.status.end_at.is_some());
    }

    #[test]
    fn callback_token_is_optional_on_the_wire() {
        let exec = execution();
        let json = serde_json::to_string(&exec).unwrap();
        assert!(!json.contains("callback_token"));
    }

    #[test]
    fn sub_agent_deserializes_from_ref_or_inline() {
        let as_ref: SubAgent =
            serde_json::from_value(serde_json::json!({"kind": "Agent", "name": "helper"}))
                .unwrap();
        assert!(matches!(as_ref, SubAgent::Ref(_)));

        let inline: SubAgent = serde_json::from_value(serde_json::json!({
            "name": "summarizer",
            "spec": {"instructions": "summarize"}
        }))
        .unwrap();
        assert!(matches!(inline, SubAgent::Inline { .. }));
    }
}
