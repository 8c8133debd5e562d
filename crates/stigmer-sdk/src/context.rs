//! Per-run resource context
//!
//! The author's program registers resources here; synthesis reads them
//! back. The context is passed explicitly, never module-level state, so
//! two programs in one process cannot bleed into each other. Registrations
//! are serialized by an internal lock: N concurrent registrations yield
//! exactly N nodes.

use parking_lot::Mutex;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use stigmer_core::{Agent, ResourceKind, StigmerError, StigmerResult, Workflow};

/// Typed node id, `kind:name`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// What a registration carries
#[derive(Debug, Clone)]
pub enum Registration {
    /// A Skill directory; packaged and pushed at deploy time
    SkillDir { name: String, dir: PathBuf },
    Agent(Agent),
    Workflow(Workflow),
}

impl Registration {
    pub fn id(&self) -> ResourceId {
        match self {
            Registration::SkillDir { name, .. } => ResourceId::new(ResourceKind::Skill, name),
            Registration::Agent(agent) => {
                ResourceId::new(ResourceKind::Agent, &agent.metadata.name)
            }
            Registration::Workflow(workflow) => {
                ResourceId::new(ResourceKind::Workflow, &workflow.metadata.name)
            }
        }
    }
}

/// The per-run registry synthesis walks
#[derive(Clone, Default)]
pub struct ResourceContext {
    nodes: Arc<Mutex<Vec<Registration>>>,
}

impl ResourceContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, registration: Registration) -> StigmerResult<ResourceId> {
        let id = registration.id();
        let mut nodes = self.nodes.lock();
        if nodes.iter().any(|n| n.id() == id) {
            return Err(StigmerError::already_exists("registration", id.to_string()));
        }
        nodes.push(registration);
        Ok(id)
    }

    /// Register a Skill directory. The folder name is the Skill name; the
    /// zip digest becomes its version at deploy time.
    pub fn register_skill_dir(&self, dir: impl Into<PathBuf>) -> StigmerResult<ResourceId> {
        let dir = dir.into();
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                StigmerError::invalid(format!("{} has no folder name", dir.display()))
            })?;
        self.register(Registration::SkillDir { name, dir })
    }

    pub fn register_agent(&self, agent: Agent) -> StigmerResult<ResourceId> {
        self.register(Registration::Agent(agent))
    }

    pub fn register_workflow(&self, workflow: Workflow) -> StigmerResult<ResourceId> {
        self.register(Registration::Workflow(workflow))
    }

    pub fn registrations(&self) -> Vec<Registration> {
        self.nodes.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stigmer_core::AgentSpec;

    fn agent(name: &str) -> Agent {
        let mut agent = Agent::named(name);
        agent.spec = AgentSpec {
            instructions: "do things".to_string(),
            ..Default::default()
        };
        agent
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let ctx = ResourceContext::new();
        ctx.register_agent(agent("reviewer")).unwrap();
        let err = ctx.register_agent(agent("reviewer")).unwrap_err();
        assert!(err.to_string().contains("reviewer"));
    }

    #[test]
    fn concurrent_registrations_all_land() {
        let ctx = ResourceContext::new();
        let n = 32;
        std::thread::scope(|scope| {
            for i in 0..n {
                let ctx = ctx.clone();
                scope.spawn(move || {
                    ctx.register_agent(agent(&format!("agent-{i}"))).unwrap();
                });
            }
        });
        assert_eq!(ctx.len(), n);
    }

    #[test]
    fn contexts_are_isolated_per_run() {
        let a = ResourceContext::new();
        let b = ResourceContext::new();
        a.register_agent(agent("only-in-a")).unwrap();
        assert_eq!(a.len(), 1);
        assert!(b.is_empty());
    }
}
