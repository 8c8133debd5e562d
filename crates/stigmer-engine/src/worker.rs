//! Worker-side engine contract
//!
//! Two worker shapes, one per task queue. The orchestrator worker accepts
//! workflow definitions and local activities only; the runner worker
//! accepts activities only. Cross-registration, the routing-collision
//! failure mode, is therefore unrepresentable rather than merely checked.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::client::{EngineError, EngineResult, TaskToken};
use crate::local::WorkflowHandle;

/// A workflow definition executed by the orchestrator worker.
///
/// Workflow code must stay deterministic and delegate all I/O to
/// activities; the engine owns replay.
#[async_trait]
pub trait WorkflowDefinition: Send + Sync {
    fn workflow_type(&self) -> &'static str;

    async fn run(&self, ctx: WorkflowContext, input: Value) -> EngineResult<Value>;
}

/// An activity implementation. Activities may either complete inline or
/// return [`ActivityOutcome::Pending`], the "result pending" sentinel,
/// after which the engine holds the activity open until an asynchronous
/// `complete_activity(token, …)` arrives.
#[async_trait]
pub trait Activity: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: ActivityContext, input: Value) -> EngineResult<ActivityOutcome>;
}

#[derive(Debug, Clone)]
pub enum ActivityOutcome {
    Completed(Value),
    /// The thread is freed; the logical activity stays running until the
    /// token is completed.
    Pending,
}

/// Ambient info handed to every activity invocation
#[derive(Debug, Clone)]
pub struct ActivityContext {
    /// Engine-issued token identifying this activity task
    pub task_token: TaskToken,
    /// Workflow that scheduled the activity
    pub workflow_id: String,
    pub attempt: u32,
}

/// Handle workflows use to schedule work; passed into
/// [`WorkflowDefinition::run`] by the engine.
#[derive(Clone)]
pub struct WorkflowContext {
    pub(crate) handle: WorkflowHandle,
}

impl WorkflowContext {
    pub fn workflow_id(&self) -> &str {
        self.handle.workflow_id()
    }

    /// Memo field recorded at start time
    pub fn memo(&self, key: &str) -> Option<String> {
        self.handle.memo(key)
    }

    /// Schedule an activity on `queue` and await its result. An activity
    /// returning the pending sentinel suspends this call until the token
    /// completes or `start_to_close` elapses.
    pub async fn execute_activity(
        &self,
        queue: &str,
        activity: &str,
        input: Value,
        start_to_close: Duration,
    ) -> EngineResult<Value> {
        self.handle
            .execute_activity(queue, activity, input, start_to_close)
            .await
    }

    /// Run a local activity in the worker process, no queue round-trip
    pub async fn execute_local_activity(&self, activity: &str, input: Value) -> EngineResult<Value> {
        self.handle.execute_local_activity(activity, input).await
    }

    /// Suspend until a matching signal arrives (at-least-once delivery)
    pub async fn wait_signal(&self, name: &str) -> EngineResult<Value> {
        match self.handle.wait_signal(name, None).await? {
            Some(payload) => Ok(payload),
            None => Err(EngineError::Internal(
                "signal wait without timeout yielded no payload".to_string(),
            )),
        }
    }

    /// Like [`wait_signal`], with a deadline. `Ok(None)` on timeout.
    pub async fn wait_signal_with_timeout(
        &self,
        name: &str,
        timeout: Duration,
    ) -> EngineResult<Option<Value>> {
        self.handle.wait_signal(name, Some(timeout)).await
    }

    /// Durable timer
    pub async fn sleep(&self, duration: Duration) {
        self.handle.sleep(duration).await;
    }
}

/// Worker bound to the orchestrator queue. Holds workflow definitions and
/// the local activities they call; it has no way to register runner
/// activities.
pub struct OrchestratorWorker {
    queue: String,
    workflows: HashMap<&'static str, Arc<dyn WorkflowDefinition>>,
    local_activities: HashMap<&'static str, Arc<dyn Activity>>,
}

impl OrchestratorWorker {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            workflows: HashMap::new(),
            local_activities: HashMap::new(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn register_workflow(&mut self, def: Arc<dyn WorkflowDefinition>) -> EngineResult<()> {
        let name = def.workflow_type();
        if self.workflows.insert(name, def).is_some() {
            return Err(EngineError::Internal(format!(
                "workflow type {name} registered twice on queue {}",
                self.queue
            )));
        }
        Ok(())
    }

    pub fn register_local_activity(&mut self, activity: Arc<dyn Activity>) -> EngineResult<()> {
        let name = activity.name();
        if self.local_activities.insert(name, activity).is_some() {
            return Err(EngineError::Internal(format!(
                "local activity {name} registered twice on queue {}",
                self.queue
            )));
        }
        Ok(())
    }

    pub(crate) fn workflow(&self, workflow_type: &str) -> Option<Arc<dyn WorkflowDefinition>> {
        self.workflows.get(workflow_type).cloned()
    }

    pub(crate) fn local_activity(&self, name: &str) -> Option<Arc<dyn Activity>> {
        self.local_activities.get(name).cloned()
    }
}

/// Worker bound to the runner queue. Activities only.
pub struct RunnerWorker {
    queue: String,
    activities: HashMap<&'static str, Arc<dyn Activity>>,
}

impl RunnerWorker {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            activities: HashMap::new(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn register_activity(&mut self, activity: Arc<dyn Activity>) -> EngineResult<()> {
        let name = activity.name();
        if self.activities.insert(name, activity).is_some() {
            return Err(EngineError::Internal(format!(
                "activity {name} registered twice on queue {}",
                self.queue
            )));
        }
        Ok(())
    }

    pub(crate) fn activity(&self, name: &str) -> Option<Arc<dyn Activity>> {
        self.activities.get(name).cloned()
    }
}
