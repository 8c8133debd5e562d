// Stigmer Core - Shared execution status types
//
// AgentExecution and WorkflowExecution carry the same status shape and the
// same phase machine; the structs here are shared between the two kinds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resource::ExecutionPhase;

/// Per-task progress recorded inside an execution's status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgress {
    pub name: String,
    #[serde(default)]
    pub phase: ExecutionPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Status block shared by both execution kinds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionStatus {
    #[serde(default)]
    pub phase: ExecutionPhase,

    /// Per-task progress, in execution order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<TaskProgress>,

    /// Result text for completed runs, cause for failed ones
    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_at: Option<DateTime<Utc>>,
}

impl ExecutionStatus {
    /// Record progress for a task, replacing any earlier entry of the same name
    pub fn upsert_task(&mut self, progress: TaskProgress) {
        match self.tasks.iter_mut().find(|t| t.name == progress.name) {
            Some(existing) => *existing = progress,
            None => self.tasks.push(progress),
        }
    }
}

/// Outcome of one `ExecuteWorkflow` activity call.
///
/// The runner executes tasks until it completes the document or reaches a
/// suspension point that belongs to the workflow (an agent call, a signal
/// wait, a timer); the surviving context map travels with the outcome so
/// the next call can resume where this one stopped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunnerOutcome {
    Completed {
        context: serde_json::Value,
    },
    /// A top-level AGENT_CALL: the orchestrator dispatches it through the
    /// async-completion token handshake
    AgentCall {
        task_name: String,
        /// Index of the task to resume at once the call resolves
        cursor: usize,
        context: serde_json::Value,
    },
    /// A top-level LISTEN: the workflow suspends on the named signal
    Listen {
        task_name: String,
        signal: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_seconds: Option<u64>,
        cursor: usize,
        context: serde_json::Value,
    },
    /// A top-level WAIT: the workflow suspends on a durable timer
    Wait {
        task_name: String,
        duration_seconds: u64,
        cursor: usize,
        context: serde_json::Value,
    },
    Failed {
        error: String,
        message: String,
        context: serde_json::Value,
    },
}

/// Model parameters for a single agent run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}
