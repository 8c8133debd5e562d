// Stigmer Runner - Workflow task engine and agent runner
//
// The runner owns the runner task queue: `ExecuteWorkflow`,
// `ExecuteAgentCall`, and any registered task activities. It talks to the
// control plane only through the channel and to the engine only through
// the client contract; it never shares code with the orchestrator worker.

pub mod activities;
pub mod agent_runner;
pub mod llm;
pub mod tasks;

use std::sync::Arc;
use tokio::task::JoinHandle;

use stigmer_engine::{Activity, EngineResult, LocalEngine, RunnerWorker};
use stigmer_server::{Channel, EngineCell, SubscribeHub};

use activities::{ExecuteAgentCallActivity, ExecuteWorkflowActivity};
use agent_runner::AgentRunner;
use llm::ModelProvider;
use tasks::TaskEngine;

pub use llm::{provider_from_env, CompletionRequest, ProviderConfig, ScriptedProvider};
pub use tasks::{TaskEngine as WorkflowTaskEngine, TaskFailure};

/// Everything the runner needs beyond the channel
pub struct RunnerOptions {
    /// Extra CALL_ACTIVITY targets
    pub activities: Vec<Arc<dyn Activity>>,
    /// Model provider; resolved from the environment when absent
    pub provider: Option<Arc<dyn ModelProvider>>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            activities: Vec::new(),
            provider: None,
        }
    }
}

/// Handle to the running agent loop
pub struct RunnerHandle {
    agent_loop: JoinHandle<()>,
}

impl RunnerHandle {
    pub fn shutdown(self) {
        self.agent_loop.abort();
    }
}

/// Attach the runner worker to its queue and start the agent runner.
///
/// Registration is activities-only by construction; the orchestrator's
/// workflow definitions cannot land on this queue.
pub fn attach(
    engine: &LocalEngine,
    channel: &Channel,
    hub: &SubscribeHub,
    engine_cell: &EngineCell,
    runner_queue: &str,
    options: RunnerOptions,
) -> EngineResult<RunnerHandle> {
    let task_engine = TaskEngine::new(channel.clone(), options.activities.clone());

    let mut worker = RunnerWorker::new(runner_queue);
    worker.register_activity(Arc::new(ExecuteWorkflowActivity::new(
        channel.clone(),
        task_engine,
    )))?;
    worker.register_activity(Arc::new(ExecuteAgentCallActivity::new(channel.clone())))?;
    for activity in options.activities {
        worker.register_activity(activity)?;
    }
    engine.attach_runner(worker)?;

    let provider = options.provider.unwrap_or_else(provider_from_env);
    let runner = AgentRunner::new(channel.clone(), engine_cell.clone(), provider);
    let agent_loop = runner.spawn(hub.clone());

    Ok(RunnerHandle { agent_loop })
}
