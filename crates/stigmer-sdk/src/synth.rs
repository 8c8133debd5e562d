//! Synthesis and deploy
//!
//! Walks the declared resource graph, captures inline dependencies
//! (references to names registered in the same run; anything else is an
//! edge out of the graph, not a node), sorts with Kahn's algorithm, and
//! drives the controllers in dependency order with Apply semantics so a
//! repeat deploy is idempotent. Skill directories route to the artifact
//! push path.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use stigmer_core::{
    Agent, ResourceKind, StigmerError, StigmerResult, SubAgent, Task, TaskKind, Workflow,
};
use stigmer_server::{Channel, ResourceClient, SkillArtifactClient};
use stigmer_store::package_skill_dir;

use crate::context::{Registration, ResourceContext, ResourceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployAction {
    PushSkill,
    Apply,
}

impl fmt::Display for DeployAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployAction::PushSkill => write!(f, "push-skill"),
            DeployAction::Apply => write!(f, "apply"),
        }
    }
}

/// One step of the ordered plan
#[derive(Debug, Clone)]
pub struct PlanStep {
    pub id: ResourceId,
    pub action: DeployAction,
    /// Inline dependencies this step waits on
    pub depends_on: Vec<ResourceId>,
}

#[derive(Debug, Clone, Default)]
pub struct DeployPlan {
    pub steps: Vec<PlanStep>,
}

/// Outcome of one deployed step
#[derive(Debug, Clone)]
pub struct DeployResult {
    pub id: ResourceId,
    pub action: DeployAction,
    /// Resource id for applies, digest for skill pushes
    pub outcome: String,
}

fn agent_dependencies(agent: &Agent, registered: &HashSet<ResourceId>) -> Vec<ResourceId> {
    let mut deps = Vec::new();
    for skill in &agent.spec.skill_refs {
        let id = ResourceId::new(ResourceKind::Skill, &skill.name);
        if registered.contains(&id) {
            deps.push(id);
        }
    }
    for sub_agent in &agent.spec.sub_agents {
        if let SubAgent::Ref(reference) = sub_agent {
            let id = ResourceId::new(ResourceKind::Agent, &reference.name);
            if registered.contains(&id) {
                deps.push(id);
            }
        }
    }
    deps
}

fn walk_tasks<'a>(tasks: &'a [Task], visit: &mut dyn FnMut(&'a Task)) {
    for task in tasks {
        visit(task);
        match &task.kind {
            TaskKind::For(config) => walk_tasks(&config.do_, visit),
            TaskKind::Fork(config) => {
                for branch in &config.branches {
                    walk_tasks(&branch.tasks, visit);
                }
            }
            TaskKind::Try(config) => {
                walk_tasks(&config.try_, visit);
                walk_tasks(&config.catch, visit);
                walk_tasks(&config.finally, visit);
            }
            _ => {}
        }
    }
}

fn workflow_dependencies(workflow: &Workflow, registered: &HashSet<ResourceId>) -> Vec<ResourceId> {
    let mut deps = Vec::new();
    walk_tasks(&workflow.spec.tasks, &mut |task| match &task.kind {
        TaskKind::AgentCall(config) => {
            let id = ResourceId::new(ResourceKind::Agent, &config.agent.name);
            if registered.contains(&id) {
                deps.push(id);
            }
        }
        TaskKind::Run(config) => {
            let id = ResourceId::new(ResourceKind::Workflow, &config.workflow);
            if registered.contains(&id) {
                deps.push(id);
            }
        }
        _ => {}
    });
    deps
}

/// Topologically sort the declared graph. A cycle fails with every node on
/// the cycle named in the error.
pub fn plan(ctx: &ResourceContext) -> StigmerResult<DeployPlan> {
    let registrations = ctx.registrations();
    let registered: HashSet<ResourceId> = registrations.iter().map(|r| r.id()).collect();

    let mut dependencies: HashMap<ResourceId, Vec<ResourceId>> = HashMap::new();
    for registration in &registrations {
        let deps = match registration {
            Registration::SkillDir { .. } => Vec::new(),
            Registration::Agent(agent) => agent_dependencies(agent, &registered),
            Registration::Workflow(workflow) => workflow_dependencies(workflow, &registered),
        };
        dependencies.insert(registration.id(), deps);
    }

    // Kahn's algorithm; dependencies deploy before their dependents.
    let mut in_degree: HashMap<ResourceId, usize> = registered
        .iter()
        .map(|id| (id.clone(), dependencies[id].len()))
        .collect();
    let mut dependents: HashMap<ResourceId, Vec<ResourceId>> = HashMap::new();
    for (node, deps) in &dependencies {
        for dep in deps {
            dependents.entry(dep.clone()).or_default().push(node.clone());
        }
    }

    // Seed in registration order so sibling ordering stays stable.
    let mut queue: VecDeque<ResourceId> = registrations
        .iter()
        .map(|r| r.id())
        .filter(|id| in_degree[id] == 0)
        .collect();

    let mut ordered = Vec::new();
    while let Some(id) = queue.pop_front() {
        ordered.push(id.clone());
        for dependent in dependents.get(&id).cloned().unwrap_or_default() {
            let degree = in_degree
                .get_mut(&dependent)
                .ok_or_else(|| StigmerError::internal("dependency graph inconsistent"))?;
            *degree -= 1;
            if *degree == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if ordered.len() != registered.len() {
        let cycle = find_cycle(&dependencies, &ordered);
        return Err(StigmerError::invalid(format!(
            "dependency cycle: {}",
            cycle
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" -> ")
        )));
    }

    let steps = ordered
        .into_iter()
        .map(|id| PlanStep {
            action: match id.kind {
                ResourceKind::Skill => DeployAction::PushSkill,
                _ => DeployAction::Apply,
            },
            depends_on: dependencies[&id].clone(),
            id,
        })
        .collect();
    Ok(DeployPlan { steps })
}

/// Walk the unresolved remainder until a node repeats; that path is the
/// cycle.
fn find_cycle(
    dependencies: &HashMap<ResourceId, Vec<ResourceId>>,
    resolved: &[ResourceId],
) -> Vec<ResourceId> {
    let resolved: HashSet<&ResourceId> = resolved.iter().collect();
    let Some(start) = dependencies.keys().find(|id| !resolved.contains(id)) else {
        return Vec::new();
    };

    let mut path = Vec::new();
    let mut seen = HashSet::new();
    let mut current = start.clone();
    loop {
        if let Some(position) = path.iter().position(|id| *id == current) {
            return path[position..].to_vec();
        }
        if !seen.insert(current.clone()) {
            return path;
        }
        path.push(current.clone());
        let next = dependencies
            .get(&current)
            .and_then(|deps| deps.iter().find(|d| !resolved.contains(d)))
            .cloned();
        match next {
            Some(next) => current = next,
            None => return path,
        }
    }
}

/// Deploy the plan through the control plane. Apply semantics throughout,
/// so running this twice with unchanged inputs is a no-op on data.
pub async fn deploy(
    ctx: &ResourceContext,
    channel: &Channel,
    dry_run: bool,
) -> StigmerResult<Vec<DeployResult>> {
    let plan = plan(ctx)?;
    if dry_run {
        return Ok(plan
            .steps
            .into_iter()
            .map(|step| DeployResult {
                id: step.id,
                action: step.action,
                outcome: "planned".to_string(),
            })
            .collect());
    }

    let by_id: HashMap<ResourceId, Registration> = ctx
        .registrations()
        .into_iter()
        .map(|r| (r.id(), r))
        .collect();

    let skills = SkillArtifactClient::new(channel.clone());
    let agents = ResourceClient::<Agent>::new(channel.clone());
    let workflows = ResourceClient::<Workflow>::new(channel.clone());

    let mut results = Vec::new();
    for step in plan.steps {
        let registration = by_id
            .get(&step.id)
            .ok_or_else(|| StigmerError::internal("plan references unknown registration"))?;
        let outcome = match registration {
            Registration::SkillDir { name, dir } => {
                let bytes = package_skill_dir(dir)?;
                let pushed = skills
                    .push(name, Default::default(), "", &bytes, None)
                    .await?;
                tracing::info!(skill = name, digest = %pushed.digest, "skill pushed");
                pushed.digest
            }
            Registration::Agent(agent) => {
                let applied = agents.apply(agent).await?;
                tracing::info!(agent = %applied.metadata.slug, id = %applied.metadata.id, "agent applied");
                applied.metadata.id
            }
            Registration::Workflow(workflow) => {
                let applied = workflows.apply(workflow).await?;
                tracing::info!(workflow = %applied.metadata.slug, id = %applied.metadata.id, "workflow applied");
                applied.metadata.id
            }
        };
        results.push(DeployResult {
            id: step.id,
            action: step.action,
            outcome,
        });
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::{agent_call, run_workflow, set, AgentBuilder, WorkflowBuilder};
    use stigmer_core::ResourceRef;

    fn simple_agent(name: &str, skill: Option<&str>) -> Agent {
        let builder = AgentBuilder::new(name);
        builder.instructions("work");
        if let Some(skill) = skill {
            builder.add_skill(ResourceRef::skill(skill));
        }
        builder.build()
    }

    #[test]
    fn dependencies_order_before_dependents() {
        let tmp = tempfile::tempdir().unwrap();
        let skill_dir = tmp.path().join("code-analysis");
        std::fs::create_dir_all(&skill_dir).unwrap();
        std::fs::write(skill_dir.join("SKILL.md"), "# analysis").unwrap();

        let ctx = ResourceContext::new();
        // registered out of dependency order on purpose
        let wf = WorkflowBuilder::new("review-pipeline");
        wf.add_task(agent_call(
            "review",
            ResourceRef::agent("code-reviewer"),
            "review this",
        ));
        ctx.register_workflow(wf.build()).unwrap();
        ctx.register_agent(simple_agent("code-reviewer", Some("code-analysis")))
            .unwrap();
        ctx.register_skill_dir(&skill_dir).unwrap();

        let plan = plan(&ctx).unwrap();
        let order: Vec<String> = plan.steps.iter().map(|s| s.id.to_string()).collect();
        let position = |name: &str| order.iter().position(|id| id == name).unwrap();
        assert!(position("skill:code-analysis") < position("agent:code-reviewer"));
        assert!(position("agent:code-reviewer") < position("workflow:review-pipeline"));
    }

    #[test]
    fn references_to_undeclared_resources_are_edges_out() {
        let ctx = ResourceContext::new();
        // references an agent that is already deployed, not declared here
        let wf = WorkflowBuilder::new("uses-platform-agent");
        wf.add_task(agent_call(
            "summarize",
            ResourceRef::agent("platform-summarizer"),
            "summarize",
        ));
        ctx.register_workflow(wf.build()).unwrap();

        let plan = plan(&ctx).unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert!(plan.steps[0].depends_on.is_empty());
    }

    #[test]
    fn cycles_name_every_node_on_the_cycle() {
        let ctx = ResourceContext::new();
        let a = WorkflowBuilder::new("wf-a");
        a.add_task(run_workflow("call-b", "wf-b", serde_json::json!({})));
        let b = WorkflowBuilder::new("wf-b");
        b.add_task(run_workflow("call-a", "wf-a", serde_json::json!({})));
        ctx.register_workflow(a.build()).unwrap();
        ctx.register_workflow(b.build()).unwrap();

        let err = plan(&ctx).unwrap_err().to_string();
        assert!(err.contains("cycle"), "{err}");
        assert!(err.contains("workflow:wf-a"), "{err}");
        assert!(err.contains("workflow:wf-b"), "{err}");
    }

    #[test]
    fn independent_nodes_keep_registration_order() {
        let ctx = ResourceContext::new();
        let first = WorkflowBuilder::new("first");
        first.add_task(set(
            "init",
            [("x".to_string(), serde_json::json!(1))].into_iter().collect(),
        ));
        let second = WorkflowBuilder::new("second");
        second.add_task(set(
            "init",
            [("x".to_string(), serde_json::json!(2))].into_iter().collect(),
        ));
        ctx.register_workflow(first.build()).unwrap();
        ctx.register_workflow(second.build()).unwrap();

        let plan = plan(&ctx).unwrap();
        assert_eq!(plan.steps[0].id.to_string(), "workflow:first");
        assert_eq!(plan.steps[1].id.to_string(), "workflow:second");
    }
}
