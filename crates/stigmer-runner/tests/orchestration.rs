//! End-to-end orchestration tests
//!
//! Full local assembly: control plane, in-process engine, orchestrator
//! worker, runner worker, agent runner with a scripted model provider.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use stigmer_core::{
    AgentCallConfig, AgentExecution, AgentExecutionSpec, AgentSpec, ExecutionPhase, Metadata,
    Phased, RaiseConfig, Resource, ResourceRef, SetConfig, StigmerResult, SwitchCase,
    SwitchConfig, Task, TaskKind, TryConfig, Workflow, WorkflowExecution, WorkflowExecutionSpec,
};
use stigmer_runner::{CompletionRequest, RunnerHandle, RunnerOptions};
use stigmer_server::{Config, ControlPlane, EngineMode, ResourceClient};

/// Provider that answers instantly, except messages containing "slow",
/// which park for a while first. Counts completed calls.
struct TestProvider {
    calls: Arc<AtomicUsize>,
    slow_delay: Duration,
}

#[async_trait]
impl stigmer_runner::llm::ModelProvider for TestProvider {
    fn name(&self) -> &str {
        "test"
    }

    async fn complete(&self, request: CompletionRequest) -> StigmerResult<String> {
        if request.message.contains("slow") {
            tokio::time::sleep(self.slow_delay).await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("reply to: {}", request.message))
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    plane: ControlPlane,
    runner: RunnerHandle,
    calls: Arc<AtomicUsize>,
}

impl Harness {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default().with_data_dir(dir.path());
        let plane = ControlPlane::start(config, EngineMode::Local).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let engine = plane.local_engine().unwrap();
        let runner = stigmer_runner::attach(
            &engine,
            &plane.channel(),
            &plane.hub(),
            &plane.engine_cell(),
            &plane.config().runner_queue,
            RunnerOptions {
                activities: Vec::new(),
                provider: Some(Arc::new(TestProvider {
                    calls: calls.clone(),
                    slow_delay: Duration::from_millis(1500),
                })),
            },
        )
        .unwrap();

        Self {
            _dir: dir,
            plane,
            runner,
            calls,
        }
    }

    async fn stop(self) {
        self.runner.shutdown();
        self.plane.shutdown().await.unwrap();
    }

    async fn create_workflow(&self, workflow: &Workflow) -> Workflow {
        ResourceClient::<Workflow>::new(self.plane.channel())
            .create(workflow)
            .await
            .unwrap()
    }

    async fn run(&self, workflow: &Workflow, name: &str) -> WorkflowExecution {
        ResourceClient::<WorkflowExecution>::new(self.plane.channel())
            .create(&WorkflowExecution {
                metadata: Metadata::named(name),
                spec: WorkflowExecutionSpec {
                    workflow_id: workflow.metadata.id.clone(),
                    ..Default::default()
                },
                status: Default::default(),
            })
            .await
            .unwrap()
    }

    async fn wait_terminal<R: Resource + Phased>(&self, id: &str, budget: Duration) -> R {
        let client = ResourceClient::<R>::new(self.plane.channel());
        let deadline = tokio::time::Instant::now() + budget;
        loop {
            let current = client.get(id).await.unwrap();
            if current.phase().is_terminal() {
                return current;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "{id} still {} after {budget:?}",
                current.phase()
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

fn set_task(name: &str, key: &str, value: serde_json::Value) -> Task {
    Task {
        name: name.to_string(),
        kind: TaskKind::Set(SetConfig {
            variables: [(key.to_string(), value)].into_iter().collect(),
        }),
    }
}

fn reviewer_agent() -> stigmer_core::Agent {
    let mut agent = stigmer_core::Agent::named("reviewer");
    agent.spec = AgentSpec {
        instructions: "review".to_string(),
        ..Default::default()
    };
    agent
}

#[tokio::test]
async fn set_and_switch_complete_through_orchestration() {
    let harness = Harness::start().await;

    let mut wf = Workflow::named("routed");
    wf.spec.tasks = vec![
        set_task("init", "status", json!(200)),
        Task {
            name: "route".to_string(),
            kind: TaskKind::Switch(SwitchConfig {
                cases: vec![SwitchCase {
                    when: "${ $context[\"init\"].status == 200 }".to_string(),
                    then: "happy".to_string(),
                }],
            }),
        },
        Task {
            name: "sad".to_string(),
            kind: TaskKind::Raise(RaiseConfig {
                error: "WRONG_BRANCH".to_string(),
                message: "switch picked the wrong case".to_string(),
            }),
        },
        set_task("happy", "done", json!(true)),
    ];
    let created = harness.create_workflow(&wf).await;
    let execution = harness.run(&created, "routed-run-1").await;

    let finished: WorkflowExecution = harness
        .wait_terminal(&execution.metadata.id, Duration::from_secs(10))
        .await;
    assert_eq!(finished.status.phase, ExecutionPhase::Completed);
    // the switch jumped over the raising task
    assert!(finished.status.tasks.iter().all(|t| t.name != "sad"));
    assert!(finished.status.tasks.iter().any(|t| t.name == "happy"));

    harness.stop().await;
}

#[tokio::test]
async fn uncaught_raise_fails_with_cause_in_message() {
    let harness = Harness::start().await;

    let mut wf = Workflow::named("doomed");
    wf.spec.tasks = vec![Task {
        name: "boom".to_string(),
        kind: TaskKind::Raise(RaiseConfig {
            error: "EXPECTED".to_string(),
            message: "deliberate failure".to_string(),
        }),
    }];
    let created = harness.create_workflow(&wf).await;
    let execution = harness.run(&created, "doomed-run-1").await;

    let finished: WorkflowExecution = harness
        .wait_terminal(&execution.metadata.id, Duration::from_secs(10))
        .await;
    assert_eq!(finished.status.phase, ExecutionPhase::Failed);
    assert!(finished.status.message.contains("deliberate failure"));

    harness.stop().await;
}

#[tokio::test]
async fn try_catch_recovers_and_finally_runs() {
    let harness = Harness::start().await;

    let mut wf = Workflow::named("guarded");
    wf.spec.tasks = vec![Task {
        name: "guard".to_string(),
        kind: TaskKind::Try(TryConfig {
            try_: vec![Task {
                name: "explode".to_string(),
                kind: TaskKind::Raise(RaiseConfig {
                    error: "CAUGHT".to_string(),
                    message: "caught below".to_string(),
                }),
            }],
            catch: vec![set_task("recover", "recovered", json!(true))],
            finally: vec![set_task("cleanup", "cleaned", json!(true))],
        }),
    }];
    let created = harness.create_workflow(&wf).await;
    let execution = harness.run(&created, "guarded-run-1").await;

    let finished: WorkflowExecution = harness
        .wait_terminal(&execution.metadata.id, Duration::from_secs(10))
        .await;
    assert_eq!(finished.status.phase, ExecutionPhase::Completed);

    harness.stop().await;
}

#[tokio::test]
async fn agent_call_completes_via_token_handshake() {
    let harness = Harness::start().await;

    let agents = ResourceClient::<stigmer_core::Agent>::new(harness.plane.channel());
    agents.create(&reviewer_agent()).await.unwrap();

    let mut wf = Workflow::named("agentic");
    wf.spec.tasks = vec![Task {
        name: "review".to_string(),
        kind: TaskKind::AgentCall(AgentCallConfig {
            agent: ResourceRef::agent("reviewer"),
            message: "please review".to_string(),
            execution_config: None,
        }),
    }];
    let created = harness.create_workflow(&wf).await;
    let execution = harness.run(&created, "agentic-run-1").await;

    let finished: WorkflowExecution = harness
        .wait_terminal(&execution.metadata.id, Duration::from_secs(10))
        .await;
    assert_eq!(finished.status.phase, ExecutionPhase::Completed);
    assert_eq!(harness.calls.load(Ordering::SeqCst), 1);

    // the agent execution carried the callback token and completed
    let agent_executions = ResourceClient::<AgentExecution>::new(harness.plane.channel());
    let all = agent_executions.list().await.unwrap();
    assert_eq!(all.len(), 1);
    assert!(all[0].spec.callback_token.is_some());
    assert_eq!(all[0].status.phase, ExecutionPhase::Completed);
    assert!(all[0].status.message.contains("please review"));

    harness.stop().await;
}

#[tokio::test]
async fn long_agent_call_does_not_block_short_executions() {
    let harness = Harness::start().await;

    let agents = ResourceClient::<stigmer_core::Agent>::new(harness.plane.channel());
    agents.create(&reviewer_agent()).await.unwrap();

    // the long call: its activity returns the pending sentinel immediately
    let mut slow = Workflow::named("slow-agent");
    slow.spec.tasks = vec![Task {
        name: "ponder".to_string(),
        kind: TaskKind::AgentCall(AgentCallConfig {
            agent: ResourceRef::agent("reviewer"),
            message: "slow deep analysis".to_string(),
            execution_config: None,
        }),
    }];
    let slow_wf = harness.create_workflow(&slow).await;
    let slow_execution = harness.run(&slow_wf, "slow-run").await;

    // give the handshake a moment to park the activity
    tokio::time::sleep(Duration::from_millis(300)).await;
    let engine = harness.plane.local_engine().unwrap();
    assert!(engine.pending_activity_count() >= 1, "no parked activity");

    // short executions keep flowing while the long call is parked
    let mut quick = Workflow::named("quick");
    quick.spec.tasks = vec![set_task("only", "ok", json!(true))];
    let quick_wf = harness.create_workflow(&quick).await;

    let short_count = 20;
    for i in 0..short_count {
        let execution = harness.run(&quick_wf, &format!("quick-run-{i}")).await;
        let finished: WorkflowExecution = harness
            .wait_terminal(&execution.metadata.id, Duration::from_secs(10))
            .await;
        assert_eq!(finished.status.phase, ExecutionPhase::Completed);
    }

    // and the long call still lands through the token path
    let finished: WorkflowExecution = harness
        .wait_terminal(&slow_execution.metadata.id, Duration::from_secs(15))
        .await;
    assert_eq!(finished.status.phase, ExecutionPhase::Completed);
    assert_eq!(harness.calls.load(Ordering::SeqCst), 1);

    harness.stop().await;
}

#[tokio::test]
async fn direct_agent_execution_skips_the_token_path() {
    let harness = Harness::start().await;

    let agents = ResourceClient::<stigmer_core::Agent>::new(harness.plane.channel());
    let created = agents.create(&reviewer_agent()).await.unwrap();

    let agent_executions = ResourceClient::<AgentExecution>::new(harness.plane.channel());
    let execution = agent_executions
        .create(&AgentExecution {
            metadata: Metadata::named("direct-ask"),
            spec: AgentExecutionSpec {
                agent_id: created.metadata.id.clone(),
                message: "direct question".to_string(),
                ..Default::default()
            },
            status: Default::default(),
        })
        .await
        .unwrap();
    assert!(execution.spec.callback_token.is_none());

    let finished: AgentExecution = harness
        .wait_terminal(&execution.metadata.id, Duration::from_secs(10))
        .await;
    assert_eq!(finished.status.phase, ExecutionPhase::Completed);
    assert!(finished.status.message.contains("direct question"));

    harness.stop().await;
}
