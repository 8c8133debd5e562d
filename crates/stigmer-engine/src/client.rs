//! Engine client contract
//!
//! The durable workflow engine is an external collaborator; the control
//! plane only depends on this trait. It covers the four capabilities the
//! core needs: start a workflow with memo fields on a named task queue,
//! signal a running workflow, cancel one, and complete an activity
//! asynchronously by opaque token.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Default queue owned by the control plane's orchestrator worker
pub const DEFAULT_ORCHESTRATOR_QUEUE: &str = "workflow_execution_orchestrator";

/// Default queue owned by the runner process
pub const DEFAULT_RUNNER_QUEUE: &str = "workflow_execution_runner";

/// Memo key carrying the runner queue name to the workflow
pub const MEMO_RUNNER_QUEUE: &str = "runner_queue";

/// Opaque, durable activity task token. The engine accepts a completion for
/// it even after the process that obtained it has restarted.
pub type TaskToken = String;

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The engine service itself cannot be reached
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    /// The workflow or activity failed for an application-level reason
    #[error("application error: {0}")]
    Application(String),

    /// An activity overran its start-to-close timeout
    #[error("activity timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// No pending activity holds this token
    #[error("unknown task token")]
    UnknownToken,

    /// The workflow was cancelled while waiting
    #[error("workflow cancelled")]
    Cancelled,

    #[error("internal engine error: {0}")]
    Internal(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Options for starting a workflow execution on the engine
#[derive(Debug, Clone, Default)]
pub struct StartWorkflowOptions {
    /// Caller-chosen workflow id (the execution resource id)
    pub workflow_id: String,

    /// Registered workflow type name
    pub workflow_type: String,

    /// Task queue the workflow worker polls
    pub task_queue: String,

    pub input: Value,

    /// Memo fields visible to the workflow at start
    pub memo: HashMap<String, String>,
}

impl StartWorkflowOptions {
    pub fn new(
        workflow_id: impl Into<String>,
        workflow_type: impl Into<String>,
        task_queue: impl Into<String>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            workflow_type: workflow_type.into(),
            task_queue: task_queue.into(),
            input: Value::Null,
            memo: HashMap::new(),
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_memo(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.memo.insert(key.into(), value.into());
        self
    }
}

/// Client half of the engine contract
#[async_trait]
pub trait Engine: Send + Sync {
    /// Start a workflow; returns the engine run id
    async fn start_workflow(&self, opts: StartWorkflowOptions) -> EngineResult<String>;

    /// Deliver a named signal to a running workflow (at-least-once)
    async fn signal_workflow(&self, workflow_id: &str, name: &str, payload: Value)
        -> EngineResult<()>;

    /// Request cancellation of a running workflow
    async fn cancel_workflow(&self, workflow_id: &str) -> EngineResult<()>;

    /// Resume the activity holding `token` with its real result.
    /// `Err(cause)` fails the activity instead of completing it.
    async fn complete_activity(
        &self,
        token: &TaskToken,
        result: Result<Value, String>,
    ) -> EngineResult<()>;
}
