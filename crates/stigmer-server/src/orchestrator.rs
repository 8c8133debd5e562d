//! Execution orchestration workflow
//!
//! The durable workflow that turns a WorkflowExecution into activity calls.
//! It lives on the orchestrator queue together with one local activity,
//! `UpdateExecutionStatus`, used for system-error recovery only; the real
//! work, `ExecuteWorkflow` and `ExecuteAgentCall`, runs on the runner
//! queue, whose name arrives as a memo so the workflow can target it when
//! scheduling activities.
//!
//! The runner returns a structured outcome after each `ExecuteWorkflow`
//! call: either the document completed (or failed, with status already
//! written by the runner), or it reached a workflow-level suspension point.
//! Agent calls ride the async-completion token handshake; signal waits and
//! timers suspend here, where the engine can persist them.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use stigmer_core::{ExecutionPhase, RunnerOutcome, WorkflowExecution};
use stigmer_engine::{
    Activity, ActivityContext, ActivityOutcome, EngineError, EngineResult, OrchestratorWorker,
    WorkflowContext, WorkflowDefinition, DEFAULT_RUNNER_QUEUE, MEMO_RUNNER_QUEUE,
};

use crate::clients::ResourceClient;
use crate::transport::Channel;

pub const EXECUTION_ORCHESTRATION: &str = "ExecutionOrchestration";
pub const EXECUTE_WORKFLOW: &str = "ExecuteWorkflow";
pub const EXECUTE_AGENT_CALL: &str = "ExecuteAgentCall";
pub const UPDATE_EXECUTION_STATUS: &str = "UpdateExecutionStatus";

/// One ExecuteWorkflow slice: bounded by task-level timeouts, far below this
const WORKFLOW_SLICE_TIMEOUT: Duration = Duration::from_secs(3600);

/// Agent calls may run for hours; the token handshake keeps the runner
/// thread free the whole time
const AGENT_CALL_TIMEOUT: Duration = Duration::from_secs(24 * 3600);

pub struct ExecutionOrchestration;

impl ExecutionOrchestration {
    /// System-error recovery: flip the execution to FAILED through the
    /// local activity. Errors here are logged and swallowed; the original
    /// failure is what the caller needs to see.
    async fn recover(&self, ctx: &WorkflowContext, execution_id: &str, cause: &str) {
        let input = json!({
            "id": execution_id,
            "phase": ExecutionPhase::Failed,
            "message": cause,
        });
        if let Err(e) = ctx
            .execute_local_activity(UPDATE_EXECUTION_STATUS, input)
            .await
        {
            warn!(execution = %execution_id, error = %e, "status recovery failed");
        }
    }
}

#[async_trait]
impl WorkflowDefinition for ExecutionOrchestration {
    fn workflow_type(&self) -> &'static str {
        EXECUTION_ORCHESTRATION
    }

    async fn run(&self, ctx: WorkflowContext, input: Value) -> EngineResult<Value> {
        let execution_id = input
            .get("execution_id")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::Application("input missing execution_id".to_string()))?
            .to_string();

        let runner_queue = ctx
            .memo(MEMO_RUNNER_QUEUE)
            .unwrap_or_else(|| DEFAULT_RUNNER_QUEUE.to_string());

        let mut cursor: usize = 0;
        let mut context = json!({});

        loop {
            let slice_input = json!({
                "execution_id": execution_id,
                "cursor": cursor,
                "context": context,
            });

            let raw = match ctx
                .execute_activity(
                    &runner_queue,
                    EXECUTE_WORKFLOW,
                    slice_input,
                    WORKFLOW_SLICE_TIMEOUT,
                )
                .await
            {
                Ok(raw) => raw,
                Err(e) => {
                    self.recover(&ctx, &execution_id, &e.to_string()).await;
                    return Err(e);
                }
            };

            let outcome: RunnerOutcome = match serde_json::from_value(raw) {
                Ok(outcome) => outcome,
                Err(e) => {
                    let cause = format!("undecodable runner outcome: {e}");
                    self.recover(&ctx, &execution_id, &cause).await;
                    return Err(EngineError::Application(cause));
                }
            };

            match outcome {
                RunnerOutcome::Completed { .. } => {
                    return Ok(json!({ "execution_id": execution_id, "phase": "COMPLETED" }));
                }
                RunnerOutcome::Failed { error, message, .. } => {
                    // The runner already wrote the FAILED status; the
                    // workflow just records the outcome and ends.
                    return Ok(json!({
                        "execution_id": execution_id,
                        "phase": "FAILED",
                        "error": error,
                        "message": message,
                    }));
                }
                RunnerOutcome::AgentCall {
                    task_name,
                    cursor: next,
                    context: survived,
                } => {
                    let call_input = json!({
                        "execution_id": execution_id,
                        "task_name": task_name.as_str(),
                        "context": survived,
                    });
                    let result = match ctx
                        .execute_activity(
                            &runner_queue,
                            EXECUTE_AGENT_CALL,
                            call_input,
                            AGENT_CALL_TIMEOUT,
                        )
                        .await
                    {
                        Ok(result) => result,
                        Err(e) => {
                            self.recover(&ctx, &execution_id, &e.to_string()).await;
                            return Err(e);
                        }
                    };
                    context = survived;
                    context[&task_name] = result;
                    cursor = next;
                }
                RunnerOutcome::Listen {
                    task_name,
                    signal,
                    timeout_seconds,
                    cursor: next,
                    context: survived,
                } => {
                    let payload = match timeout_seconds {
                        Some(secs) => ctx
                            .wait_signal_with_timeout(&signal, Duration::from_secs(secs))
                            .await?
                            .unwrap_or_else(|| json!({ "timed_out": true })),
                        None => ctx.wait_signal(&signal).await?,
                    };
                    context = survived;
                    context[&task_name] = payload;
                    cursor = next;
                }
                RunnerOutcome::Wait {
                    task_name,
                    duration_seconds,
                    cursor: next,
                    context: survived,
                } => {
                    ctx.sleep(Duration::from_secs(duration_seconds)).await;
                    context = survived;
                    context[&task_name] = json!({ "waited_seconds": duration_seconds });
                    cursor = next;
                }
            }
        }
    }
}

/// Local activity: write an execution status through the channel. The
/// orchestrator worker starts only after the transport serves, so the
/// channel is always valid here.
pub struct UpdateExecutionStatusActivity {
    executions: ResourceClient<WorkflowExecution>,
}

impl UpdateExecutionStatusActivity {
    pub fn new(channel: Channel) -> Self {
        Self {
            executions: ResourceClient::new(channel),
        }
    }
}

#[async_trait]
impl Activity for UpdateExecutionStatusActivity {
    fn name(&self) -> &'static str {
        UPDATE_EXECUTION_STATUS
    }

    async fn execute(&self, _ctx: ActivityContext, input: Value) -> EngineResult<ActivityOutcome> {
        let id = input
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::Application("missing id".to_string()))?;
        let phase: ExecutionPhase = serde_json::from_value(
            input.get("phase").cloned().unwrap_or(Value::Null),
        )
        .map_err(|e| EngineError::Application(format!("bad phase: {e}")))?;
        let message = input.get("message").and_then(Value::as_str);

        self.executions
            .update_status(id, phase, message, None)
            .await
            .map_err(|e| EngineError::Application(e.to_string()))?;
        Ok(ActivityOutcome::Completed(json!({})))
    }
}

/// Build the orchestrator worker: the workflow definition plus its single
/// local activity, nothing else. Runner activities cannot be registered
/// here by construction.
pub fn orchestrator_worker(queue: &str, channel: Channel) -> EngineResult<OrchestratorWorker> {
    let mut worker = OrchestratorWorker::new(queue);
    worker.register_workflow(Arc::new(ExecutionOrchestration))?;
    worker.register_local_activity(Arc::new(UpdateExecutionStatusActivity::new(channel)))?;
    Ok(worker)
}
