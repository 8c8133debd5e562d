//! Runner-queue activities
//!
//! Activities receive only the execution's id and pull everything else
//! back through the channel, so retries always see current state and the
//! workflow history stays small. `ExecuteAgentCall` owns the token
//! handshake: it persists its engine-issued token inside the created
//! AgentExecution *before* returning the pending sentinel, so a crash in
//! between can never orphan the workflow.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use stigmer_core::{
    Agent, AgentExecution, AgentExecutionSpec, ExecutionPhase, Metadata, TaskKind, TaskProgress,
    Workflow, WorkflowExecution, WorkflowInstance,
};
use stigmer_engine::{Activity, ActivityContext, ActivityOutcome, EngineError, EngineResult};
use stigmer_server::orchestrator::{EXECUTE_AGENT_CALL, EXECUTE_WORKFLOW};
use stigmer_server::{Channel, ResourceClient};

use crate::tasks::expr::render_str;
use crate::tasks::TaskEngine;

fn app_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::Application(e.to_string())
}

fn required_str<'a>(input: &'a Value, field: &str) -> EngineResult<&'a str> {
    input
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::Application(format!("input missing {field}")))
}

/// Pull the execution and its workflow document through the channel
async fn load_execution_chain(
    channel: &Channel,
    execution_id: &str,
) -> EngineResult<(WorkflowExecution, Workflow)> {
    let executions = ResourceClient::<WorkflowExecution>::new(channel.clone());
    let instances = ResourceClient::<WorkflowInstance>::new(channel.clone());
    let workflows = ResourceClient::<Workflow>::new(channel.clone());

    let execution = executions.get(execution_id).await.map_err(app_err)?;
    let instance = instances
        .get(&execution.spec.instance_id)
        .await
        .map_err(app_err)?;
    let workflow = workflows
        .get(&instance.spec.workflow_id)
        .await
        .map_err(app_err)?;
    Ok((execution, workflow))
}

/// Runs a slice of the workflow document through the task engine
pub struct ExecuteWorkflowActivity {
    channel: Channel,
    engine: TaskEngine,
}

impl ExecuteWorkflowActivity {
    pub fn new(channel: Channel, engine: TaskEngine) -> Self {
        Self { channel, engine }
    }
}

#[async_trait]
impl Activity for ExecuteWorkflowActivity {
    fn name(&self) -> &'static str {
        EXECUTE_WORKFLOW
    }

    async fn execute(&self, _ctx: ActivityContext, input: Value) -> EngineResult<ActivityOutcome> {
        let execution_id = required_str(&input, "execution_id")?;
        let cursor = input.get("cursor").and_then(Value::as_u64).unwrap_or(0) as usize;
        let context = input.get("context").cloned().unwrap_or(Value::Null);

        let (execution, workflow) = load_execution_chain(&self.channel, execution_id).await?;
        let executions = ResourceClient::<WorkflowExecution>::new(self.channel.clone());

        if cursor == 0 {
            executions
                .update_status(execution_id, ExecutionPhase::InProgress, None, None)
                .await
                .map_err(app_err)?;
        }

        let outcome = self
            .engine
            .run_slice(&execution, &workflow, cursor, context)
            .await;

        match &outcome {
            stigmer_core::RunnerOutcome::Completed { .. } => {
                executions
                    .update_status(
                        execution_id,
                        ExecutionPhase::Completed,
                        Some("workflow completed"),
                        None,
                    )
                    .await
                    .map_err(app_err)?;
                info!(execution = execution_id, "workflow execution completed");
            }
            stigmer_core::RunnerOutcome::Failed { message, .. } => {
                executions
                    .update_status(execution_id, ExecutionPhase::Failed, Some(message), None)
                    .await
                    .map_err(app_err)?;
            }
            _ => {}
        }

        let value = serde_json::to_value(&outcome).map_err(app_err)?;
        Ok(ActivityOutcome::Completed(value))
    }
}

/// The token handshake for long agent calls.
///
/// Ordering contract: the AgentExecution carrying the token is persisted
/// first; only then does the activity return the pending sentinel and free
/// its thread. Completion arrives later from the agent runner via
/// `complete_activity(token, …)`.
pub struct ExecuteAgentCallActivity {
    channel: Channel,
}

impl ExecuteAgentCallActivity {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl Activity for ExecuteAgentCallActivity {
    fn name(&self) -> &'static str {
        EXECUTE_AGENT_CALL
    }

    async fn execute(&self, ctx: ActivityContext, input: Value) -> EngineResult<ActivityOutcome> {
        let execution_id = required_str(&input, "execution_id")?;
        let task_name = required_str(&input, "task_name")?;
        let context = input.get("context").cloned().unwrap_or(Value::Null);

        let (execution, workflow) = load_execution_chain(&self.channel, execution_id).await?;

        let task = workflow
            .spec
            .tasks
            .iter()
            .find(|t| t.name == task_name)
            .ok_or_else(|| EngineError::Application(format!("unknown task {task_name}")))?;
        let TaskKind::AgentCall(config) = &task.kind else {
            return Err(EngineError::Application(format!(
                "task {task_name} is not an agent call"
            )));
        };

        let agents = ResourceClient::<Agent>::new(self.channel.clone());
        let mut reference = config.agent.clone();
        if reference.org.is_empty() {
            reference.scope = execution.metadata.owner_scope;
            reference.org = execution.metadata.org.clone();
        }
        let (agent, _) = agents.get_by_reference(&reference).await.map_err(app_err)?;

        let message = match render_str(&config.message, &context) {
            Value::String(s) => s,
            other => other.to_string(),
        };

        // Persist-token-then-pend: the created record is the recoverable
        // home of the task token.
        let agent_executions = ResourceClient::<AgentExecution>::new(self.channel.clone());
        let request = AgentExecution {
            metadata: Metadata::named(format!(
                "{}-{}",
                agent.metadata.slug,
                uuid::Uuid::new_v4().simple()
            )),
            spec: AgentExecutionSpec {
                session_id: execution.metadata.id.clone(),
                agent_id: agent.metadata.id.clone(),
                message,
                execution_config: config.execution_config.clone().unwrap_or_default(),
                runtime_env: Default::default(),
                callback_token: Some(ctx.task_token.clone()),
            },
            status: Default::default(),
        };
        let created = agent_executions.create(&request).await.map_err(app_err)?;
        debug!(
            execution = execution_id,
            agent_execution = %created.metadata.id,
            "agent call dispatched; activity pending"
        );

        let executions = ResourceClient::<WorkflowExecution>::new(self.channel.clone());
        let progress = TaskProgress {
            name: task_name.to_string(),
            phase: ExecutionPhase::InProgress,
            output: Some(json!({ "agent_execution_id": created.metadata.id })),
            error: None,
        };
        executions
            .update_status(execution_id, ExecutionPhase::InProgress, None, Some(&progress))
            .await
            .map_err(app_err)?;

        Ok(ActivityOutcome::Pending)
    }
}
