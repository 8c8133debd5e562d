//! Workflow task engine
//!
//! Executes a workflow document's tasks inside the `ExecuteWorkflow`
//! activity. Top-level AGENT_CALL, LISTEN and WAIT tasks are workflow-level
//! suspension points and surface as runner outcomes; everything else,
//! including the same kinds nested inside FOR/FORK/TRY blocks, runs
//! inline. State between tasks flows through the context map, keyed by
//! task name.

pub mod expr;

use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use stigmer_core::{
    Agent, AgentCallConfig, AgentExecution, AgentExecutionSpec, ExecutionPhase, Metadata, Phased,
    Resource, RunnerOutcome, Signal, SwitchConfig, Task, TaskKind, TaskProgress, Workflow,
    WorkflowExecution, WorkflowExecutionSpec, MAX_CALL_TIMEOUT_SECONDS, MIN_CALL_TIMEOUT_SECONDS,
};
use stigmer_engine::{Activity, ActivityContext, ActivityOutcome};
use stigmer_server::{Channel, ResourceClient};

use expr::{eval_condition, render_str, render_value};

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const DEFAULT_WAIT_BUDGET: Duration = Duration::from_secs(3600);

/// Application-level task failure; maps to EXECUTION_FAILED with the cause
/// carried in status.message
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub error: String,
    pub message: String,
}

impl TaskFailure {
    fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

pub struct TaskEngine {
    channel: Channel,
    http: reqwest::Client,
    /// CALL_ACTIVITY targets registered on the runner
    activities: HashMap<String, Arc<dyn Activity>>,
}

impl TaskEngine {
    pub fn new(channel: Channel, activities: Vec<Arc<dyn Activity>>) -> Self {
        let activities = activities
            .into_iter()
            .map(|a| (a.name().to_string(), a))
            .collect();
        Self {
            channel,
            http: reqwest::Client::new(),
            activities,
        }
    }

    fn executions(&self) -> ResourceClient<WorkflowExecution> {
        ResourceClient::new(self.channel.clone())
    }

    /// Execute top-level tasks from `cursor` until the document completes
    /// or a workflow-level suspension point is reached.
    pub async fn run_slice(
        &self,
        execution: &WorkflowExecution,
        workflow: &Workflow,
        cursor: usize,
        mut context: Value,
    ) -> RunnerOutcome {
        if !context.is_object() {
            context = json!({});
        }
        seed_context(&mut context, execution);

        let tasks = &workflow.spec.tasks;
        let mut index = cursor;
        while index < tasks.len() {
            let task = &tasks[index];
            debug!(task = %task.name, kind = task.kind.kind_name(), "running task");

            match &task.kind {
                TaskKind::AgentCall(_) => {
                    self.report(execution, &task.name, ExecutionPhase::InProgress, None, None)
                        .await;
                    return RunnerOutcome::AgentCall {
                        task_name: task.name.clone(),
                        cursor: index + 1,
                        context,
                    };
                }
                TaskKind::Listen(config) => {
                    self.report(execution, &task.name, ExecutionPhase::InProgress, None, None)
                        .await;
                    return RunnerOutcome::Listen {
                        task_name: task.name.clone(),
                        signal: config.signal.clone(),
                        timeout_seconds: config.timeout_seconds,
                        cursor: index + 1,
                        context,
                    };
                }
                TaskKind::Wait(config) => {
                    self.report(execution, &task.name, ExecutionPhase::InProgress, None, None)
                        .await;
                    return RunnerOutcome::Wait {
                        task_name: task.name.clone(),
                        duration_seconds: config.duration_seconds,
                        cursor: index + 1,
                        context,
                    };
                }
                TaskKind::Switch(config) => {
                    match self.pick_switch_target(config, tasks, &context, &task.name) {
                        Ok(Some(target)) => {
                            context[task.name.as_str()] = json!({ "jumped_to": tasks[target].name });
                            index = target;
                        }
                        Ok(None) => {
                            // no case matched: fall through
                            context[task.name.as_str()] = json!({ "jumped_to": Value::Null });
                            index += 1;
                        }
                        Err(failure) => return self.fail(execution, &task.name, failure, context).await,
                    }
                    continue;
                }
                _ => match self.execute_inline(task, &mut context, execution).await {
                    Ok(result) => {
                        context[task.name.as_str()] = result.clone();
                        self.report(
                            execution,
                            &task.name,
                            ExecutionPhase::Completed,
                            Some(result),
                            None,
                        )
                        .await;
                        index += 1;
                    }
                    Err(failure) => return self.fail(execution, &task.name, failure, context).await,
                },
            }
        }

        RunnerOutcome::Completed { context }
    }

    async fn fail(
        &self,
        execution: &WorkflowExecution,
        task_name: &str,
        failure: TaskFailure,
        context: Value,
    ) -> RunnerOutcome {
        self.report(
            execution,
            task_name,
            ExecutionPhase::Failed,
            None,
            Some(failure.message.clone()),
        )
        .await;
        RunnerOutcome::Failed {
            error: failure.error,
            message: failure.message,
            context,
        }
    }

    /// Stream one task's progress back to the control plane. Best effort:
    /// a failed report never fails the task itself.
    async fn report(
        &self,
        execution: &WorkflowExecution,
        task_name: &str,
        phase: ExecutionPhase,
        output: Option<Value>,
        error: Option<String>,
    ) {
        let progress = TaskProgress {
            name: task_name.to_string(),
            phase,
            output,
            error,
        };
        if let Err(e) = self
            .executions()
            .update_status(
                &execution.metadata.id,
                ExecutionPhase::InProgress,
                None,
                Some(&progress),
            )
            .await
        {
            debug!(task = task_name, error = %e, "progress report dropped");
        }
    }

    /// SWITCH: cases top-down, first matching `when` names the next task;
    /// no match falls through.
    fn pick_switch_target(
        &self,
        config: &SwitchConfig,
        tasks: &[Task],
        context: &Value,
        task_name: &str,
    ) -> Result<Option<usize>, TaskFailure> {
        for case in &config.cases {
            if eval_condition(&case.when, context) {
                let target = tasks.iter().position(|t| t.name == case.then).ok_or_else(|| {
                    TaskFailure::new(
                        "SWITCH_TARGET_MISSING",
                        format!("switch {task_name} branches to unknown task {}", case.then),
                    )
                })?;
                return Ok(Some(target));
            }
        }
        Ok(None)
    }

    /// Run a nested task list to completion; suspension kinds run inline
    /// here (a nested wait sleeps, a nested listen polls signal records, a
    /// nested agent call takes the direct path).
    fn run_block<'a>(
        &'a self,
        tasks: &'a [Task],
        context: &'a mut Value,
        execution: &'a WorkflowExecution,
    ) -> BoxFuture<'a, Result<(), TaskFailure>> {
        Box::pin(async move {
            let mut index = 0;
            while index < tasks.len() {
                let task = &tasks[index];
                if let TaskKind::Switch(config) = &task.kind {
                    match self.pick_switch_target(config, tasks, context, &task.name)? {
                        Some(target) => {
                            context[task.name.as_str()] = json!({ "jumped_to": tasks[target].name });
                            index = target;
                        }
                        None => {
                            context[task.name.as_str()] = json!({ "jumped_to": Value::Null });
                            index += 1;
                        }
                    }
                    continue;
                }
                let result = self.execute_inline(task, context, execution).await?;
                context[task.name.as_str()] = result;
                index += 1;
            }
            Ok(())
        })
    }

    /// Execute one non-switch task inline and return its result value
    fn execute_inline<'a>(
        &'a self,
        task: &'a Task,
        context: &'a mut Value,
        execution: &'a WorkflowExecution,
    ) -> BoxFuture<'a, Result<Value, TaskFailure>> {
        Box::pin(async move {
            match &task.kind {
                TaskKind::Set(config) => {
                    let mut out = Map::new();
                    for (key, value) in &config.variables {
                        out.insert(key.clone(), render_value(value, context));
                    }
                    Ok(Value::Object(out))
                }

                TaskKind::HttpCall(config) => {
                    let url = render_text(&config.url, context);
                    let method = reqwest::Method::from_bytes(config.method.as_bytes())
                        .map_err(|_| {
                            TaskFailure::new(
                                "HTTP_BAD_METHOD",
                                format!("invalid method {}", config.method),
                            )
                        })?;
                    let timeout = clamp_timeout(config.timeout_seconds);

                    let mut request = self.http.request(method, &url).timeout(timeout);
                    for (name, value) in &config.headers {
                        request = request.header(name, render_text(value, context));
                    }
                    if let Some(body) = &config.body {
                        request = request.json(&render_value(body, context));
                    }

                    let response = request.send().await.map_err(|e| {
                        TaskFailure::new("HTTP_CALL_FAILED", format!("{url}: {e}"))
                    })?;
                    let status = response.status().as_u16();
                    let text = response.text().await.unwrap_or_default();
                    let body = serde_json::from_str::<Value>(&text)
                        .unwrap_or(Value::String(text));
                    Ok(json!({ "status": status, "body": body }))
                }

                TaskKind::GrpcCall(config) => {
                    // JSON transcoding over HTTP; a native channel per call
                    // target is the remote deployment's concern
                    let url = format!(
                        "http://{}/{}/{}",
                        render_text(&config.endpoint, context),
                        config.service,
                        config.method
                    );
                    let timeout = clamp_timeout(config.timeout_seconds);
                    let payload = config
                        .payload
                        .as_ref()
                        .map(|p| render_value(p, context))
                        .unwrap_or(Value::Null);

                    let response = self
                        .http
                        .post(&url)
                        .timeout(timeout)
                        .json(&payload)
                        .send()
                        .await
                        .map_err(|e| {
                            TaskFailure::new("GRPC_CALL_FAILED", format!("{url}: {e}"))
                        })?;
                    let status = response.status().as_u16();
                    let body = response.json::<Value>().await.unwrap_or(Value::Null);
                    Ok(json!({ "status": status, "body": body }))
                }

                TaskKind::AgentCall(config) => self.run_agent_direct(config, context, execution).await,

                TaskKind::For(config) => {
                    let iterable = render_str(&config.in_, context);
                    let items = iterable.as_array().cloned().ok_or_else(|| {
                        TaskFailure::new(
                            "FOR_NOT_ITERABLE",
                            format!("task {}: `in` did not yield an array", task.name),
                        )
                    })?;
                    for (position, item) in items.iter().enumerate() {
                        context[config.each.as_str()] =
                            json!({ "value": item, "index": position });
                        self.run_block(&config.do_, context, execution).await?;
                    }
                    Ok(json!({ "iterations": items.len() }))
                }

                TaskKind::Fork(config) => {
                    // Branches run concurrently on cloned contexts; their
                    // results merge back when every branch has completed.
                    let branches = config.branches.iter().map(|branch| {
                        let mut branch_context = context.clone();
                        async move {
                            let result = self
                                .run_block(&branch.tasks, &mut branch_context, execution)
                                .await;
                            (branch.name.clone(), branch_context, result)
                        }
                    });
                    let outcomes = futures::future::join_all(branches).await;

                    let mut names = Vec::new();
                    for (name, branch_context, result) in outcomes {
                        result?;
                        if let Value::Object(entries) = branch_context {
                            for (key, value) in entries {
                                context[key.as_str()] = value;
                            }
                        }
                        names.push(name);
                    }
                    Ok(json!({ "branches": names }))
                }

                TaskKind::Try(config) => {
                    let attempt = self.run_block(&config.try_, context, execution).await;
                    let outcome = match attempt {
                        Ok(()) => Ok(json!({ "caught": false })),
                        Err(failure) => {
                            if config.catch.is_empty() {
                                Err(failure)
                            } else {
                                context["error"] = json!({
                                    "error": failure.error,
                                    "message": failure.message,
                                });
                                self.run_block(&config.catch, context, execution).await?;
                                Ok(json!({ "caught": true, "error": failure.error }))
                            }
                        }
                    };
                    // finally always runs; its failure wins only over success
                    let finale = self.run_block(&config.finally, context, execution).await;
                    match (outcome, finale) {
                        (Err(failure), _) => Err(failure),
                        (Ok(_), Err(failure)) => Err(failure),
                        (Ok(result), Ok(())) => Ok(result),
                    }
                }

                TaskKind::Listen(config) => {
                    self.wait_signal_record(
                        &execution.metadata.id,
                        &config.signal,
                        config.timeout_seconds,
                    )
                    .await
                }

                TaskKind::Wait(config) => {
                    tokio::time::sleep(Duration::from_secs(config.duration_seconds)).await;
                    Ok(json!({ "waited_seconds": config.duration_seconds }))
                }

                TaskKind::CallActivity(config) => {
                    let activity = self.activities.get(&config.activity).ok_or_else(|| {
                        TaskFailure::new(
                            "ACTIVITY_NOT_REGISTERED",
                            format!("activity {} not registered", config.activity),
                        )
                    })?;
                    let ctx = ActivityContext {
                        task_token: uuid::Uuid::new_v4().to_string(),
                        workflow_id: execution.metadata.id.clone(),
                        attempt: 1,
                    };
                    let input = render_value(&config.input, context);
                    match activity.execute(ctx, input).await {
                        Ok(ActivityOutcome::Completed(value)) => Ok(value),
                        Ok(ActivityOutcome::Pending) => Err(TaskFailure::new(
                            "ACTIVITY_PENDING",
                            "task activities must complete inline",
                        )),
                        Err(e) => Err(TaskFailure::new("ACTIVITY_FAILED", e.to_string())),
                    }
                }

                TaskKind::Raise(config) => Err(TaskFailure::new(
                    config.error.clone(),
                    if config.message.is_empty() {
                        config.error.clone()
                    } else {
                        render_text(&config.message, context)
                    },
                )),

                TaskKind::Run(config) => self.run_child_workflow(config, context, execution).await,

                TaskKind::Switch(_) => Err(TaskFailure::new(
                    "SWITCH_MISROUTED",
                    "switch is handled by the block runner",
                )),
            }
        })
    }

    /// Direct-path agent call: no callback token, the branch blocks until
    /// the agent execution reaches a terminal phase.
    async fn run_agent_direct(
        &self,
        config: &AgentCallConfig,
        context: &Value,
        execution: &WorkflowExecution,
    ) -> Result<Value, TaskFailure> {
        let agents = ResourceClient::<Agent>::new(self.channel.clone());
        let mut reference = config.agent.clone();
        if reference.org.is_empty() {
            reference.scope = execution.metadata.owner_scope;
            reference.org = execution.metadata.org.clone();
        }
        let (agent, _) = agents.get_by_reference(&reference).await.map_err(|e| {
            TaskFailure::new("AGENT_NOT_FOUND", format!("{}: {e}", reference.name))
        })?;

        let message = render_text(&config.message, context);
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
                callback_token: None,
            },
            status: Default::default(),
        };
        let created = agent_executions
            .create(&request)
            .await
            .map_err(|e| TaskFailure::new("AGENT_CALL_FAILED", e.to_string()))?;

        let budget = config
            .execution_config
            .as_ref()
            .and_then(|c| c.timeout_seconds)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_WAIT_BUDGET);
        let finished = wait_terminal(&agent_executions, &created.metadata.id, budget).await?;
        match finished.status.phase {
            ExecutionPhase::Completed => Ok(json!({ "message": finished.status.message })),
            phase => Err(TaskFailure::new(
                "AGENT_CALL_FAILED",
                format!("agent execution ended {phase}: {}", finished.status.message),
            )),
        }
    }

    async fn run_child_workflow(
        &self,
        config: &stigmer_core::RunConfig,
        context: &Value,
        execution: &WorkflowExecution,
    ) -> Result<Value, TaskFailure> {
        let workflows = ResourceClient::<Workflow>::new(self.channel.clone());
        let child = workflows
            .get_by_slug(
                execution.metadata.owner_scope,
                &execution.metadata.org,
                &config.workflow,
            )
            .await
            .map_err(|e| TaskFailure::new("WORKFLOW_NOT_FOUND", format!("{}: {e}", config.workflow)))?;

        let mut input = HashMap::new();
        if let Value::Object(entries) = render_value(&config.input, context) {
            for (key, value) in entries {
                input.insert(key, value);
            }
        }

        let executions = self.executions();
        let request = WorkflowExecution {
            metadata: Metadata::named(format!(
                "{}-{}",
                child.metadata.slug,
                uuid::Uuid::new_v4().simple()
            )),
            spec: WorkflowExecutionSpec {
                instance_id: String::new(),
                workflow_id: child.metadata.id.clone(),
                input,
                message: None,
                callback_token: None,
            },
            status: Default::default(),
        };
        let created = executions
            .create(&request)
            .await
            .map_err(|e| TaskFailure::new("RUN_FAILED", e.to_string()))?;

        let finished =
            wait_terminal(&executions, &created.metadata.id, DEFAULT_WAIT_BUDGET).await?;
        match finished.status.phase {
            ExecutionPhase::Completed => Ok(json!({
                "execution_id": finished.metadata.id,
                "message": finished.status.message,
            })),
            phase => Err(TaskFailure::new(
                "RUN_FAILED",
                format!("child workflow ended {phase}: {}", finished.status.message),
            )),
        }
    }

    /// Nested LISTEN: at-least-once delivery through the persisted Signal
    /// records, so a signal published before the poll started still lands.
    async fn wait_signal_record(
        &self,
        execution_id: &str,
        signal: &str,
        timeout_seconds: Option<u64>,
    ) -> Result<Value, TaskFailure> {
        let signals = ResourceClient::<Signal>::new(self.channel.clone());
        let deadline = tokio::time::Instant::now()
            + timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_WAIT_BUDGET);
        loop {
            let records = signals
                .get_by_parent(execution_id)
                .await
                .map_err(|e| TaskFailure::new("LISTEN_FAILED", e.to_string()))?;
            if let Some(record) = records.iter().find(|s| s.spec.signal_name == signal) {
                return Ok(record.spec.payload.clone());
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(json!({ "timed_out": true }));
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}

/// Initial context entries every slice can rely on
fn seed_context(context: &mut Value, execution: &WorkflowExecution) {
    if context.get("input").is_none() {
        context["input"] = json!(execution.spec.input);
    }
    if context.get("message").is_none() {
        context["message"] = json!(execution.spec.message);
    }
}

fn render_text(template: &str, context: &Value) -> String {
    match render_str(template, context) {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn clamp_timeout(seconds: u64) -> Duration {
    Duration::from_secs(seconds.clamp(MIN_CALL_TIMEOUT_SECONDS, MAX_CALL_TIMEOUT_SECONDS))
}

/// Poll an execution until it reaches a terminal phase
async fn wait_terminal<R: Resource + Phased>(
    client: &ResourceClient<R>,
    id: &str,
    budget: Duration,
) -> Result<R, TaskFailure> {
    let deadline = tokio::time::Instant::now() + budget;
    loop {
        let current = client
            .get(id)
            .await
            .map_err(|e| TaskFailure::new("WAIT_FAILED", e.to_string()))?;
        if current.phase().is_terminal() {
            return Ok(current);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(TaskFailure::new(
                "WAIT_TIMEOUT",
                format!("{} {} still {} after {budget:?}", R::KIND, id, current.phase()),
            ));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
