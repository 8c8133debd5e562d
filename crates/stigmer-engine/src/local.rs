//! In-process engine
//!
//! The local deployment runs the engine contract inside the control-plane
//! process: per-queue dispatch to attached workers, a pending-token table
//! for async activity completion, buffered signal delivery, and timers.
//! A remote engine client implements the same [`Engine`] trait; nothing
//! above this module knows which one it holds. Deterministic replay is the
//! external engine's concern and is not reproduced here.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::client::{Engine, EngineError, EngineResult, StartWorkflowOptions, TaskToken};
use crate::worker::{
    ActivityContext, ActivityOutcome, OrchestratorWorker, RunnerWorker, WorkflowContext,
};

type CompletionSender = oneshot::Sender<Result<Value, String>>;
type SignalMessage = (String, Value);

struct EngineInner {
    orchestrators: DashMap<String, Arc<OrchestratorWorker>>,
    runners: DashMap<String, Arc<RunnerWorker>>,
    /// Open async-completion tokens
    pending: DashMap<TaskToken, CompletionSender>,
    /// Signal inbox senders, one per running workflow
    signals: DashMap<String, mpsc::UnboundedSender<SignalMessage>>,
    running: DashMap<String, tokio::task::JoinHandle<()>>,
}

/// The in-process durable-engine stand-in
#[derive(Clone)]
pub struct LocalEngine {
    inner: Arc<EngineInner>,
}

impl Default for LocalEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalEngine {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EngineInner {
                orchestrators: DashMap::new(),
                runners: DashMap::new(),
                pending: DashMap::new(),
                signals: DashMap::new(),
                running: DashMap::new(),
            }),
        }
    }

    /// Attach the orchestrator worker to its queue. A second worker on the
    /// same queue is a routing collision and is refused.
    pub fn attach_orchestrator(&self, worker: OrchestratorWorker) -> EngineResult<()> {
        let queue = worker.queue().to_string();
        if self.inner.orchestrators.contains_key(&queue) {
            return Err(EngineError::Internal(format!(
                "queue {queue} already has an orchestrator worker"
            )));
        }
        self.inner.orchestrators.insert(queue, Arc::new(worker));
        Ok(())
    }

    pub fn attach_runner(&self, worker: RunnerWorker) -> EngineResult<()> {
        let queue = worker.queue().to_string();
        if self.inner.runners.contains_key(&queue) {
            return Err(EngineError::Internal(format!(
                "queue {queue} already has a runner worker"
            )));
        }
        self.inner.runners.insert(queue, Arc::new(worker));
        Ok(())
    }

    /// Detach all workers and abort running workflows (shutdown path)
    pub fn shutdown(&self) {
        for entry in self.inner.running.iter() {
            entry.value().abort();
        }
        self.inner.running.clear();
        self.inner.signals.clear();
        self.inner.orchestrators.clear();
        self.inner.runners.clear();
    }

    /// Number of activities currently parked on a token
    pub fn pending_activity_count(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn is_running(&self, workflow_id: &str) -> bool {
        self.inner
            .running
            .get(workflow_id)
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

#[async_trait]
impl Engine for LocalEngine {
    async fn start_workflow(&self, opts: StartWorkflowOptions) -> EngineResult<String> {
        let worker = self
            .inner
            .orchestrators
            .get(&opts.task_queue)
            .map(|w| w.clone())
            .ok_or_else(|| {
                EngineError::Unavailable(format!("no worker polling queue {}", opts.task_queue))
            })?;

        let def = worker.workflow(&opts.workflow_type).ok_or_else(|| {
            EngineError::Application(format!(
                "workflow type {} not registered on queue {}",
                opts.workflow_type, opts.task_queue
            ))
        })?;

        let workflow_id = opts.workflow_id.clone();
        if self.is_running(&workflow_id) {
            return Err(EngineError::Application(format!(
                "workflow {workflow_id} already running"
            )));
        }

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        self.inner.signals.insert(workflow_id.clone(), signal_tx);

        let handle = WorkflowHandle {
            engine: self.inner.clone(),
            workflow_id: workflow_id.clone(),
            queue: opts.task_queue.clone(),
            memo: Arc::new(opts.memo.clone()),
            signal_rx: Arc::new(Mutex::new(signal_rx)),
            buffered_signals: Arc::new(Mutex::new(Vec::new())),
        };

        let inner = self.inner.clone();
        let input = opts.input.clone();
        let spawn_id = workflow_id.clone();
        let join = tokio::spawn(async move {
            let ctx = WorkflowContext {
                handle: handle.clone(),
            };
            match def.run(ctx, input).await {
                Ok(_) => debug!(workflow_id = %spawn_id, "workflow completed"),
                Err(e) => warn!(workflow_id = %spawn_id, error = %e, "workflow failed"),
            }
            inner.signals.remove(&spawn_id);
            inner.running.remove(&spawn_id);
        });
        self.inner.running.insert(workflow_id.clone(), join);

        Ok(format!("run-{}", Uuid::new_v4()))
    }

    async fn signal_workflow(
        &self,
        workflow_id: &str,
        name: &str,
        payload: Value,
    ) -> EngineResult<()> {
        match self.inner.signals.get(workflow_id) {
            Some(tx) => tx
                .send((name.to_string(), payload))
                .map_err(|_| EngineError::Application(format!("workflow {workflow_id} not running"))),
            None => Err(EngineError::Application(format!(
                "workflow {workflow_id} not running"
            ))),
        }
    }

    async fn cancel_workflow(&self, workflow_id: &str) -> EngineResult<()> {
        if let Some((_, handle)) = self.inner.running.remove(workflow_id) {
            handle.abort();
        }
        self.inner.signals.remove(workflow_id);
        Ok(())
    }

    async fn complete_activity(
        &self,
        token: &TaskToken,
        result: Result<Value, String>,
    ) -> EngineResult<()> {
        match self.inner.pending.remove(token) {
            Some((_, tx)) => {
                // Receiver gone means the workflow already moved on
                // (timeout or cancellation); the completion is dropped.
                let _ = tx.send(result);
                Ok(())
            }
            None => Err(EngineError::UnknownToken),
        }
    }
}

/// Per-workflow handle backing [`WorkflowContext`]
#[derive(Clone)]
pub struct WorkflowHandle {
    engine: Arc<EngineInner>,
    workflow_id: String,
    queue: String,
    memo: Arc<HashMap<String, String>>,
    signal_rx: Arc<Mutex<mpsc::UnboundedReceiver<SignalMessage>>>,
    /// Signals received while waiting for a different name
    buffered_signals: Arc<Mutex<Vec<SignalMessage>>>,
}

impl WorkflowHandle {
    pub(crate) fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub(crate) fn memo(&self, key: &str) -> Option<String> {
        self.memo.get(key).cloned()
    }

    pub(crate) async fn execute_activity(
        &self,
        queue: &str,
        activity: &str,
        input: Value,
        start_to_close: Duration,
    ) -> EngineResult<Value> {
        let worker = self
            .engine
            .runners
            .get(queue)
            .map(|w| w.clone())
            .ok_or_else(|| {
                EngineError::Unavailable(format!("no worker polling queue {queue}"))
            })?;

        let act = worker.activity(activity).ok_or_else(|| {
            EngineError::Application(format!("activity {activity} not registered on {queue}"))
        })?;

        let token: TaskToken = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        // The token must be claimable before the activity body runs, so a
        // completion can never race ahead of its registration.
        self.engine.pending.insert(token.clone(), tx);

        let ctx = ActivityContext {
            task_token: token.clone(),
            workflow_id: self.workflow_id.clone(),
            attempt: 1,
        };

        let outcome = match act.execute(ctx, input).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.engine.pending.remove(&token);
                return Err(e);
            }
        };

        match outcome {
            ActivityOutcome::Completed(value) => {
                self.engine.pending.remove(&token);
                Ok(value)
            }
            ActivityOutcome::Pending => {
                match tokio::time::timeout(start_to_close, rx).await {
                    Ok(Ok(Ok(value))) => Ok(value),
                    Ok(Ok(Err(cause))) => Err(EngineError::Application(cause)),
                    Ok(Err(_)) => Err(EngineError::Internal(
                        "pending activity dropped without completion".to_string(),
                    )),
                    Err(_) => {
                        self.engine.pending.remove(&token);
                        Err(EngineError::Timeout(start_to_close))
                    }
                }
            }
        }
    }

    pub(crate) async fn execute_local_activity(
        &self,
        activity: &str,
        input: Value,
    ) -> EngineResult<Value> {
        let worker = self
            .engine
            .orchestrators
            .get(&self.queue)
            .map(|w| w.clone())
            .ok_or_else(|| {
                EngineError::Unavailable(format!("no worker polling queue {}", self.queue))
            })?;

        let act = worker.local_activity(activity).ok_or_else(|| {
            EngineError::Application(format!("local activity {activity} not registered"))
        })?;

        let ctx = ActivityContext {
            task_token: Uuid::new_v4().to_string(),
            workflow_id: self.workflow_id.clone(),
            attempt: 1,
        };

        match act.execute(ctx, input).await? {
            ActivityOutcome::Completed(value) => Ok(value),
            // Local activities execute in-process; there is no queue task to
            // hold open, so the pending sentinel is a programming error.
            ActivityOutcome::Pending => Err(EngineError::Internal(
                "local activities cannot return the pending sentinel".to_string(),
            )),
        }
    }

    pub(crate) async fn wait_signal(
        &self,
        name: &str,
        timeout: Option<Duration>,
    ) -> EngineResult<Option<Value>> {
        // Drain the buffer first: at-least-once delivery means an earlier
        // wait may have parked this name.
        {
            let mut buffered = self.buffered_signals.lock().await;
            if let Some(pos) = buffered.iter().position(|(n, _)| n == name) {
                let (_, payload) = buffered.remove(pos);
                return Ok(Some(payload));
            }
        }

        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            let mut rx = self.signal_rx.lock().await;
            let received = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, rx.recv()).await {
                        Ok(msg) => msg,
                        Err(_) => return Ok(None),
                    }
                }
                None => rx.recv().await,
            };
            drop(rx);

            match received {
                Some((signal, payload)) if signal == name => return Ok(Some(payload)),
                Some(other) => {
                    self.buffered_signals.lock().await.push(other);
                }
                None => return Err(EngineError::Cancelled),
            }
        }
    }

    pub(crate) async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{
        DEFAULT_ORCHESTRATOR_QUEUE as ORCH_Q, DEFAULT_RUNNER_QUEUE as RUN_Q, MEMO_RUNNER_QUEUE,
    };
    use crate::worker::WorkflowDefinition;
    use serde_json::json;

    struct EchoActivity;

    #[async_trait]
    impl crate::worker::Activity for EchoActivity {
        fn name(&self) -> &'static str {
            "Echo"
        }

        async fn execute(
            &self,
            _ctx: ActivityContext,
            input: Value,
        ) -> EngineResult<ActivityOutcome> {
            Ok(ActivityOutcome::Completed(input))
        }
    }

    /// Parks on its token and publishes the token for the test to complete
    struct ParkActivity {
        token_tx: mpsc::UnboundedSender<TaskToken>,
    }

    #[async_trait]
    impl crate::worker::Activity for ParkActivity {
        fn name(&self) -> &'static str {
            "Park"
        }

        async fn execute(
            &self,
            ctx: ActivityContext,
            _input: Value,
        ) -> EngineResult<ActivityOutcome> {
            self.token_tx.send(ctx.task_token).ok();
            Ok(ActivityOutcome::Pending)
        }
    }

    struct DriverWorkflow {
        activity: &'static str,
        result_tx: mpsc::UnboundedSender<EngineResult<Value>>,
    }

    #[async_trait]
    impl WorkflowDefinition for DriverWorkflow {
        fn workflow_type(&self) -> &'static str {
            "Driver"
        }

        async fn run(&self, ctx: WorkflowContext, input: Value) -> EngineResult<Value> {
            let queue = ctx
                .memo(MEMO_RUNNER_QUEUE)
                .unwrap_or_else(|| RUN_Q.to_string());
            let result = ctx
                .execute_activity(&queue, self.activity, input, Duration::from_secs(5))
                .await;
            self.result_tx.send(result.clone()).ok();
            result
        }
    }

    fn engine_with(
        activity: &'static str,
        result_tx: mpsc::UnboundedSender<EngineResult<Value>>,
        token_tx: mpsc::UnboundedSender<TaskToken>,
    ) -> LocalEngine {
        let engine = LocalEngine::new();

        let mut orch = OrchestratorWorker::new(ORCH_Q);
        orch.register_workflow(Arc::new(DriverWorkflow {
            activity,
            result_tx,
        }))
        .unwrap();
        engine.attach_orchestrator(orch).unwrap();

        let mut runner = RunnerWorker::new(RUN_Q);
        runner.register_activity(Arc::new(EchoActivity)).unwrap();
        runner
            .register_activity(Arc::new(ParkActivity { token_tx }))
            .unwrap();
        engine.attach_runner(runner).unwrap();

        engine
    }

    fn start_opts(id: &str, input: Value) -> StartWorkflowOptions {
        StartWorkflowOptions::new(id, "Driver", ORCH_Q)
            .with_input(input)
            .with_memo(MEMO_RUNNER_QUEUE, RUN_Q)
    }

    #[tokio::test]
    async fn inline_activity_completes_synchronously() {
        let (result_tx, mut result_rx) = mpsc::unbounded_channel();
        let (token_tx, _token_rx) = mpsc::unbounded_channel();
        let engine = engine_with("Echo", result_tx, token_tx);

        engine
            .start_workflow(start_opts("wf-1", json!({"x": 1})))
            .await
            .unwrap();

        let result = result_rx.recv().await.unwrap().unwrap();
        assert_eq!(result, json!({"x": 1}));
        assert_eq!(engine.pending_activity_count(), 0);
    }

    #[tokio::test]
    async fn pending_activity_resumes_on_token_completion() {
        let (result_tx, mut result_rx) = mpsc::unbounded_channel();
        let (token_tx, mut token_rx) = mpsc::unbounded_channel();
        let engine = engine_with("Park", result_tx, token_tx);

        engine
            .start_workflow(start_opts("wf-2", Value::Null))
            .await
            .unwrap();

        // The activity returned the pending sentinel: its thread is free,
        // the logical activity is still open.
        let token = token_rx.recv().await.unwrap();
        assert_eq!(engine.pending_activity_count(), 1);
        assert!(result_rx.try_recv().is_err());

        engine
            .complete_activity(&token, Ok(json!("late result")))
            .await
            .unwrap();

        let result = result_rx.recv().await.unwrap().unwrap();
        assert_eq!(result, json!("late result"));
    }

    #[tokio::test]
    async fn completing_an_unknown_token_fails() {
        let engine = LocalEngine::new();
        let err = engine
            .complete_activity(&"bogus".to_string(), Ok(Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownToken));
    }

    #[tokio::test]
    async fn start_without_worker_is_unavailable() {
        let engine = LocalEngine::new();
        let err = engine
            .start_workflow(start_opts("wf-3", Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Unavailable(_)));
    }

    #[tokio::test]
    async fn signals_buffer_until_a_matching_wait() {
        struct ListenWorkflow {
            result_tx: mpsc::UnboundedSender<Value>,
        }

        #[async_trait]
        impl WorkflowDefinition for ListenWorkflow {
            fn workflow_type(&self) -> &'static str {
                "Listen"
            }

            async fn run(&self, ctx: WorkflowContext, _input: Value) -> EngineResult<Value> {
                let payload = ctx.wait_signal("approval").await?;
                self.result_tx.send(payload.clone()).ok();
                Ok(payload)
            }
        }

        let engine = LocalEngine::new();
        let (result_tx, mut result_rx) = mpsc::unbounded_channel();
        let mut orch = OrchestratorWorker::new(ORCH_Q);
        orch.register_workflow(Arc::new(ListenWorkflow { result_tx }))
            .unwrap();
        engine.attach_orchestrator(orch).unwrap();

        engine
            .start_workflow(StartWorkflowOptions::new("wf-4", "Listen", ORCH_Q))
            .await
            .unwrap();

        // An unrelated signal first; the listener must not wake on it.
        tokio::time::sleep(Duration::from_millis(20)).await;
        engine
            .signal_workflow("wf-4", "noise", json!("ignored"))
            .await
            .unwrap();
        engine
            .signal_workflow("wf-4", "approval", json!("approved"))
            .await
            .unwrap();

        assert_eq!(result_rx.recv().await.unwrap(), json!("approved"));
    }
}
