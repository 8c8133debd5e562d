// Stigmer Core - Resource model, task model, and error taxonomy
//
// Foundation types for the Stigmer control plane: the metadata envelope
// shared by every resource kind, the workflow task model, typed expression
// references, and the error taxonomy every layer speaks.

pub mod agent;
pub mod error;
pub mod execution;
pub mod expr;
pub mod metadata;
pub mod resource;
pub mod skill;
pub mod task;
pub mod workflow;

// Re-export core types
pub use agent::{
    Agent, AgentExecution, AgentExecutionSpec, AgentInstance, AgentInstanceSpec, AgentSpec,
    AgentStatus, EnvSpec, McpServer, McpTransport, SubAgent,
};
pub use error::{ErrorCode, StigmerError, StigmerResult};
pub use execution::{ExecutionConfig, ExecutionStatus, RunnerOutcome, TaskProgress};
pub use expr::{Condition, ExprRef, TaskRef};
pub use metadata::{default_instance_slug, generate_id, normalize_slug, Metadata, OwnerScope};
pub use resource::{ExecutionPhase, Phased, Resource, ResourceKind, ResourceRef};
pub use skill::{Skill, SkillSpec, LATEST_TAG};
pub use task::{
    AgentCallConfig, CallActivityConfig, ForConfig, ForkBranch, ForkConfig, GrpcCallConfig,
    HttpCallConfig, ListenConfig, RaiseConfig, RunConfig, SetConfig, SwitchCase, SwitchConfig,
    Task, TaskKind, TryConfig, WaitConfig, MAX_CALL_TIMEOUT_SECONDS, MIN_CALL_TIMEOUT_SECONDS,
};
pub use workflow::{
    Signal, SignalSpec, Workflow, WorkflowDocument, WorkflowExecution, WorkflowExecutionSpec,
    WorkflowInstance, WorkflowInstanceSpec, WorkflowSpec, WorkflowStatus,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
