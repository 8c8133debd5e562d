//! Control-plane behavior tests
//!
//! These run the full daemon assembly (store, transport, controllers) with
//! the engine disabled, which is exactly the degraded deployment: creates
//! succeed, executions stay PENDING, queries and CRUD keep working.

use serde_json::json;

use stigmer_core::{
    default_instance_slug, Agent, AgentSpec, ExecutionPhase, Metadata, OwnerScope, ResourceRef,
    SetConfig, Skill, StigmerError, Task, TaskKind, Workflow, WorkflowExecution,
    WorkflowExecutionSpec, WorkflowInstance, WorkflowInstanceSpec,
};
use stigmer_server::{Config, ControlPlane, EngineMode, ResourceClient, SkillArtifactClient};

async fn plane() -> (tempfile::TempDir, ControlPlane) {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::default().with_data_dir(dir.path());
    let plane = ControlPlane::start(config, EngineMode::Disabled).await.unwrap();
    (dir, plane)
}

fn agent(name: &str) -> Agent {
    let mut agent = Agent::named(name);
    agent.spec = AgentSpec {
        instructions: "review the change".to_string(),
        skill_refs: vec![ResourceRef::skill("code-analysis")],
        ..Default::default()
    };
    agent
}

fn workflow(name: &str) -> Workflow {
    let mut workflow = Workflow::named(name);
    workflow.spec.tasks.push(Task {
        name: "init".to_string(),
        kind: TaskKind::Set(SetConfig {
            variables: [("x".to_string(), json!(1))].into_iter().collect(),
        }),
    });
    workflow
}

#[tokio::test]
async fn apply_twice_is_idempotent_on_data() {
    let (_dir, plane) = plane().await;
    let channel = plane.channel();
    let skills = SkillArtifactClient::new(channel.clone());
    let agents = ResourceClient::<Agent>::new(channel.clone());
    let skill_resources = ResourceClient::<Skill>::new(channel.clone());

    let pushed = skills
        .push("code-analysis", OwnerScope::User, "", b"zip-bytes-v1", None)
        .await
        .unwrap();

    let first = agents.apply(&agent("Code Reviewer")).await.unwrap();
    let second = agents.apply(&agent("Code Reviewer")).await.unwrap();

    assert_eq!(first.metadata.id, second.metadata.id);
    assert_eq!(second.metadata.slug, "code-reviewer");
    assert_eq!(
        first.status.default_instance_id,
        second.status.default_instance_id
    );
    assert!(!second.status.default_instance_id.is_empty());

    // the skill's latest tag still points at the first digest
    let (skill, digest) = skill_resources
        .get_by_reference(&ResourceRef::skill("code-analysis"))
        .await
        .unwrap();
    assert_eq!(digest.as_deref(), Some(pushed.digest.as_str()));
    assert_eq!(skill.resolve_tag(None), Some(pushed.digest.as_str()));

    plane.shutdown().await.unwrap();
}

#[tokio::test]
async fn create_then_create_is_already_exists() {
    let (_dir, plane) = plane().await;
    let agents = ResourceClient::<Agent>::new(plane.channel());

    agents.create(&agent("reviewer")).await.unwrap();
    let err = agents.create(&agent("reviewer")).await.unwrap_err();
    assert!(matches!(err, StigmerError::AlreadyExists { .. }), "{err}");

    plane.shutdown().await.unwrap();
}

#[tokio::test]
async fn cross_org_instance_is_rejected_naming_both_orgs() {
    let (_dir, plane) = plane().await;
    let channel = plane.channel();
    let workflows = ResourceClient::<Workflow>::new(channel.clone());
    let instances = ResourceClient::<WorkflowInstance>::new(channel.clone());

    let mut wf = workflow("deploy-pipeline");
    wf.metadata.owner_scope = OwnerScope::Organization;
    wf.metadata.org = "acme".to_string();
    let created = workflows.create(&wf).await.unwrap();

    let mut instance = WorkflowInstance {
        metadata: Metadata::named("globex-binding"),
        spec: WorkflowInstanceSpec {
            workflow_id: created.metadata.id.clone(),
            ..Default::default()
        },
        status: Default::default(),
    };
    instance.metadata.owner_scope = OwnerScope::Organization;
    instance.metadata.org = "globex".to_string();

    let err = instances.create(&instance).await.unwrap_err();
    assert!(matches!(err, StigmerError::InvalidArgument(_)), "{err}");
    let message = err.to_string();
    assert!(message.contains("acme"), "{message}");
    assert!(message.contains("globex"), "{message}");

    plane.shutdown().await.unwrap();
}

#[tokio::test]
async fn orphaned_default_instance_is_repaired_on_run() {
    let (_dir, plane) = plane().await;
    let channel = plane.channel();
    let store = plane.store();
    let workflows = ResourceClient::<Workflow>::new(channel.clone());
    let executions = ResourceClient::<WorkflowExecution>::new(channel.clone());

    let created = workflows.create(&workflow("nightly-report")).await.unwrap();
    let instance_id = created.status.default_instance_id.clone();
    assert!(!instance_id.is_empty());

    // Simulate the crash window: the child exists under its canonical slug
    // but the parent lost its pointer.
    let mut wounded = created.clone();
    wounded.status.default_instance_id = String::new();
    store.save(&wounded).unwrap();

    let request = WorkflowExecution {
        metadata: Metadata::named("nightly-report-run-1"),
        spec: WorkflowExecutionSpec {
            workflow_id: wounded.metadata.id.clone(),
            ..Default::default()
        },
        status: Default::default(),
    };
    let execution = executions.create(&request).await.unwrap();
    assert_eq!(execution.spec.instance_id, instance_id);

    // the pointer is repaired and no duplicate instance exists
    let repaired: Workflow = store.get(&wounded.metadata.id).unwrap();
    assert_eq!(repaired.status.default_instance_id, instance_id);
    let instances = store.list::<WorkflowInstance>().unwrap();
    let defaults: Vec<_> = instances
        .iter()
        .filter(|i| i.metadata.slug == default_instance_slug("nightly-report"))
        .collect();
    assert_eq!(defaults.len(), 1);

    plane.shutdown().await.unwrap();
}

#[tokio::test]
async fn engine_down_leaves_executions_pending_and_crud_working() {
    let (_dir, plane) = plane().await;
    let channel = plane.channel();
    let workflows = ResourceClient::<Workflow>::new(channel.clone());
    let executions = ResourceClient::<WorkflowExecution>::new(channel.clone());

    let created = workflows.create(&workflow("resilient")).await.unwrap();

    let request = WorkflowExecution {
        metadata: Metadata::named("resilient-run-1"),
        spec: WorkflowExecutionSpec {
            workflow_id: created.metadata.id.clone(),
            ..Default::default()
        },
        status: Default::default(),
    };
    let execution = executions.create(&request).await.unwrap();
    assert_eq!(execution.status.phase, ExecutionPhase::Pending);

    // no spontaneous progress, and queries keep answering
    let fetched = executions.get(&execution.metadata.id).await.unwrap();
    assert_eq!(fetched.status.phase, ExecutionPhase::Pending);
    assert_eq!(workflows.list().await.unwrap().len(), 1);

    plane.shutdown().await.unwrap();
}

#[tokio::test]
async fn skill_tag_update_keeps_old_versions_addressable() {
    let (_dir, plane) = plane().await;
    let channel = plane.channel();
    let skills = SkillArtifactClient::new(channel.clone());
    let skill_resources = ResourceClient::<Skill>::new(channel.clone());

    let v1 = skills
        .push("code-analysis", OwnerScope::User, "", b"body v1", None)
        .await
        .unwrap();
    let v2 = skills
        .push("code-analysis", OwnerScope::User, "", b"body v2", None)
        .await
        .unwrap();
    assert_ne!(v1.digest, v2.digest);

    // no version tag: latest resolves at call time to the new digest
    let (_, latest) = skill_resources
        .get_by_reference(&ResourceRef::skill("code-analysis"))
        .await
        .unwrap();
    assert_eq!(latest.as_deref(), Some(v2.digest.as_str()));

    // the first digest stays reachable through its content tag
    let v1_tag = format!("v1-{}", &v1.digest[..12]);
    let (_, pinned) = skill_resources
        .get_by_reference(&ResourceRef::skill("code-analysis").with_version_tag(&v1_tag))
        .await
        .unwrap();
    assert_eq!(pinned.as_deref(), Some(v1.digest.as_str()));

    // pull returns the exact bytes for each tag
    let (_, bytes) = skills.pull("code-analysis", Some(&v1_tag)).await.unwrap();
    assert_eq!(bytes, b"body v1");
    let (_, bytes) = skills.pull("code-analysis", None).await.unwrap();
    assert_eq!(bytes, b"body v2");

    plane.shutdown().await.unwrap();
}

#[tokio::test]
async fn status_updates_reach_subscribers_in_order() {
    let (_dir, plane) = plane().await;
    let channel = plane.channel();
    let workflows = ResourceClient::<Workflow>::new(channel.clone());
    let executions = ResourceClient::<WorkflowExecution>::new(channel.clone());

    let created = workflows.create(&workflow("observed")).await.unwrap();
    let execution = executions
        .create(&WorkflowExecution {
            metadata: Metadata::named("observed-run-1"),
            spec: WorkflowExecutionSpec {
                workflow_id: created.metadata.id.clone(),
                ..Default::default()
            },
            status: Default::default(),
        })
        .await
        .unwrap();
    let id = execution.metadata.id.clone();

    let mut stream = executions.subscribe(&id).await.unwrap();

    executions
        .update_status(&id, ExecutionPhase::InProgress, Some("working"), None)
        .await
        .unwrap();
    executions
        .update_status(&id, ExecutionPhase::Completed, Some("done"), None)
        .await
        .unwrap();

    let mut phases = Vec::new();
    while let Some(snapshot) = stream.recv().await {
        phases.push(snapshot.status.phase);
    }
    assert_eq!(
        phases,
        vec![
            ExecutionPhase::Pending,
            ExecutionPhase::InProgress,
            ExecutionPhase::Completed,
        ]
    );

    // terminal phases absorb later updates
    let after = executions
        .update_status(&id, ExecutionPhase::InProgress, None, None)
        .await
        .unwrap();
    assert_eq!(after.status.phase, ExecutionPhase::Completed);

    plane.shutdown().await.unwrap();
}
