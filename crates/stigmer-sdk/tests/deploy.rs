//! Deploy tests against a live control plane
//!
//! The apply-twice property: deploying the same project twice leaves every
//! digest and id unchanged.

use std::fs;
use std::path::Path;

use stigmer_core::{Agent, AgentInstance, ResourceRef, Skill};
use stigmer_sdk::{agent_call, AgentBuilder, ResourceContext, WorkflowBuilder};
use stigmer_server::{Config, ControlPlane, EngineMode, ResourceClient};

fn write_skill_dir(root: &Path) -> std::path::PathBuf {
    let dir = root.join("code-analysis");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("SKILL.md"), "# Code Analysis\n\nRead diffs.").unwrap();
    dir
}

fn project(skill_dir: &Path) -> ResourceContext {
    let ctx = ResourceContext::new();
    ctx.register_skill_dir(skill_dir).unwrap();

    let agent = AgentBuilder::new("code-reviewer");
    agent.instructions("Review changes.");
    agent.add_skill(ResourceRef::skill("code-analysis"));
    ctx.register_agent(agent.build()).unwrap();

    let workflow = WorkflowBuilder::new("review-pipeline");
    workflow.add_task(agent_call(
        "review",
        ResourceRef::agent("code-reviewer"),
        "review the change",
    ));
    ctx.register_workflow(workflow.build()).unwrap();
    ctx
}

#[tokio::test]
async fn apply_twice_leaves_digests_and_ids_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let skill_dir = write_skill_dir(dir.path());
    let config = Config::default().with_data_dir(dir.path().join("data"));
    let plane = ControlPlane::start(config, EngineMode::Disabled).await.unwrap();
    let channel = plane.channel();

    let first = stigmer_sdk::deploy(&project(&skill_dir), &channel, false)
        .await
        .unwrap();
    let second = stigmer_sdk::deploy(&project(&skill_dir), &channel, false)
        .await
        .unwrap();

    assert_eq!(first.len(), 3);
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.outcome, b.outcome, "{} changed between applies", a.id);
    }

    // the skill's latest tag still points at the deterministic digest
    let skill_digest = &first[0].outcome;
    let skills = ResourceClient::<Skill>::new(channel.clone());
    let (skill, resolved) = skills
        .get_by_reference(&ResourceRef::skill("code-analysis"))
        .await
        .unwrap();
    assert_eq!(resolved.as_deref(), Some(skill_digest.as_str()));
    assert_eq!(skill.resolve_tag(None), Some(skill_digest.as_str()));

    // exactly one default instance for the agent
    let agents = ResourceClient::<Agent>::new(channel.clone());
    let agent = agents
        .get_by_slug(Default::default(), "", "code-reviewer")
        .await
        .unwrap();
    assert!(!agent.status.default_instance_id.is_empty());
    let instances = ResourceClient::<AgentInstance>::new(channel.clone());
    let children = instances.get_by_parent(&agent.metadata.id).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].metadata.slug, "code-reviewer-default");

    plane.shutdown().await.unwrap();
}

#[tokio::test]
async fn dry_run_plans_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let skill_dir = write_skill_dir(dir.path());
    let config = Config::default().with_data_dir(dir.path().join("data"));
    let plane = ControlPlane::start(config, EngineMode::Disabled).await.unwrap();
    let channel = plane.channel();

    let planned = stigmer_sdk::deploy(&project(&skill_dir), &channel, true)
        .await
        .unwrap();
    assert_eq!(planned.len(), 3);
    assert!(planned.iter().all(|r| r.outcome == "planned"));

    let agents = ResourceClient::<Agent>::new(channel.clone());
    assert!(agents.list().await.unwrap().is_empty());

    plane.shutdown().await.unwrap();
}
