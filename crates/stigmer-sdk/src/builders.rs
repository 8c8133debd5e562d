//! Thread-safe resource builders
//!
//! Builders serialize their collection mutations with a per-resource lock,
//! so a program assembling one agent from several tasks concurrently never
//! loses an add. Task constructors produce the typed task model; expression
//! strings come only from the typed refs in `stigmer_core::expr`.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;

use stigmer_core::{
    Agent, AgentCallConfig, AgentSpec, Condition, EnvSpec, ForConfig, ForkBranch, ForkConfig,
    HttpCallConfig, ListenConfig, McpServer, RaiseConfig, ResourceRef, RunConfig, SetConfig,
    SubAgent, SwitchCase, SwitchConfig, Task, TaskKind, TryConfig, WaitConfig, Workflow,
    WorkflowDocument,
};

// ============================================================================
// AgentBuilder
// ============================================================================

pub struct AgentBuilder {
    name: String,
    instructions: Mutex<String>,
    description: Mutex<String>,
    icon: Mutex<String>,
    skills: Mutex<Vec<ResourceRef>>,
    mcp_servers: Mutex<Vec<McpServer>>,
    sub_agents: Mutex<Vec<SubAgent>>,
    env: Mutex<EnvSpec>,
}

impl AgentBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: Mutex::new(String::new()),
            description: Mutex::new(String::new()),
            icon: Mutex::new(String::new()),
            skills: Mutex::new(Vec::new()),
            mcp_servers: Mutex::new(Vec::new()),
            sub_agents: Mutex::new(Vec::new()),
            env: Mutex::new(EnvSpec::default()),
        }
    }

    pub fn instructions(&self, text: impl Into<String>) -> &Self {
        *self.instructions.lock() = text.into();
        self
    }

    pub fn description(&self, text: impl Into<String>) -> &Self {
        *self.description.lock() = text.into();
        self
    }

    pub fn icon(&self, icon: impl Into<String>) -> &Self {
        *self.icon.lock() = icon.into();
        self
    }

    /// Concurrent adds are serialized; N adds yield N refs
    pub fn add_skill(&self, reference: ResourceRef) -> &Self {
        self.skills.lock().push(reference);
        self
    }

    pub fn add_mcp_server(&self, server: McpServer) -> &Self {
        self.mcp_servers.lock().push(server);
        self
    }

    pub fn add_sub_agent(&self, sub_agent: SubAgent) -> &Self {
        self.sub_agents.lock().push(sub_agent);
        self
    }

    pub fn env(&self, key: impl Into<String>, value: impl Into<String>) -> &Self {
        self.env.lock().env.insert(key.into(), value.into());
        self
    }

    pub fn build(&self) -> Agent {
        let mut agent = Agent::named(self.name.clone());
        agent.spec = AgentSpec {
            instructions: self.instructions.lock().clone(),
            description: self.description.lock().clone(),
            icon: self.icon.lock().clone(),
            skill_refs: self.skills.lock().clone(),
            mcp_servers: self.mcp_servers.lock().clone(),
            sub_agents: self.sub_agents.lock().clone(),
            env_spec: self.env.lock().clone(),
        };
        agent
    }
}

// ============================================================================
// WorkflowBuilder
// ============================================================================

pub struct WorkflowBuilder {
    name: String,
    namespace: Mutex<String>,
    version: Mutex<Option<String>>,
    tasks: Mutex<Vec<Task>>,
    env: Mutex<EnvSpec>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Mutex::new("default".to_string()),
            version: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            env: Mutex::new(EnvSpec::default()),
        }
    }

    pub fn namespace(&self, namespace: impl Into<String>) -> &Self {
        *self.namespace.lock() = namespace.into();
        self
    }

    pub fn version(&self, version: impl Into<String>) -> &Self {
        *self.version.lock() = Some(version.into());
        self
    }

    pub fn add_task(&self, task: Task) -> &Self {
        self.tasks.lock().push(task);
        self
    }

    pub fn env(&self, key: impl Into<String>, value: impl Into<String>) -> &Self {
        self.env.lock().env.insert(key.into(), value.into());
        self
    }

    pub fn build(&self) -> Workflow {
        let mut workflow = Workflow::named(self.name.clone());
        workflow.spec.document = WorkflowDocument {
            namespace: self.namespace.lock().clone(),
            name: self.name.clone(),
            version: self.version.lock().clone(),
        };
        workflow.spec.tasks = self.tasks.lock().clone();
        workflow.spec.env_spec = self.env.lock().clone();
        workflow
    }
}

// ============================================================================
// Task constructors
// ============================================================================

pub fn set(name: impl Into<String>, variables: BTreeMap<String, Value>) -> Task {
    Task {
        name: name.into(),
        kind: TaskKind::Set(SetConfig { variables }),
    }
}

pub fn http_call(name: impl Into<String>, config: HttpCallConfig) -> Task {
    Task {
        name: name.into(),
        kind: TaskKind::HttpCall(config),
    }
}

pub fn agent_call(
    name: impl Into<String>,
    agent: ResourceRef,
    message: impl Into<String>,
) -> Task {
    Task {
        name: name.into(),
        kind: TaskKind::AgentCall(AgentCallConfig {
            agent,
            message: message.into(),
            execution_config: None,
        }),
    }
}

/// One `(when, then)` pair per case; first match wins, no match falls
/// through
pub fn switch(
    name: impl Into<String>,
    cases: impl IntoIterator<Item = (Condition, String)>,
) -> Task {
    Task {
        name: name.into(),
        kind: TaskKind::Switch(SwitchConfig {
            cases: cases
                .into_iter()
                .map(|(when, then)| SwitchCase {
                    when: when.as_str().to_string(),
                    then,
                })
                .collect(),
        }),
    }
}

pub fn for_each(
    name: impl Into<String>,
    each: impl Into<String>,
    in_: stigmer_core::ExprRef,
    body: Vec<Task>,
) -> Task {
    Task {
        name: name.into(),
        kind: TaskKind::For(ForConfig {
            each: each.into(),
            in_: in_.to_expr(),
            do_: body,
        }),
    }
}

pub fn fork(
    name: impl Into<String>,
    branches: impl IntoIterator<Item = (String, Vec<Task>)>,
) -> Task {
    Task {
        name: name.into(),
        kind: TaskKind::Fork(ForkConfig {
            branches: branches
                .into_iter()
                .map(|(name, tasks)| ForkBranch { name, tasks })
                .collect(),
        }),
    }
}

pub fn try_catch(
    name: impl Into<String>,
    try_: Vec<Task>,
    catch: Vec<Task>,
    finally: Vec<Task>,
) -> Task {
    Task {
        name: name.into(),
        kind: TaskKind::Try(TryConfig {
            try_,
            catch,
            finally,
        }),
    }
}

pub fn listen(name: impl Into<String>, signal: impl Into<String>) -> Task {
    Task {
        name: name.into(),
        kind: TaskKind::Listen(ListenConfig {
            signal: signal.into(),
            timeout_seconds: None,
        }),
    }
}

pub fn wait(name: impl Into<String>, duration_seconds: u64) -> Task {
    Task {
        name: name.into(),
        kind: TaskKind::Wait(WaitConfig { duration_seconds }),
    }
}

pub fn raise(name: impl Into<String>, error: impl Into<String>, message: impl Into<String>) -> Task {
    Task {
        name: name.into(),
        kind: TaskKind::Raise(RaiseConfig {
            error: error.into(),
            message: message.into(),
        }),
    }
}

pub fn run_workflow(name: impl Into<String>, workflow: impl Into<String>, input: Value) -> Task {
    Task {
        name: name.into(),
        kind: TaskKind::Run(RunConfig {
            workflow: workflow.into(),
            input,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stigmer_core::{Resource, TaskRef};

    #[test]
    fn concurrent_skill_adds_all_land() {
        let builder = AgentBuilder::new("reviewer");
        builder.instructions("review code");
        let n = 24;
        std::thread::scope(|scope| {
            for i in 0..n {
                let builder = &builder;
                scope.spawn(move || {
                    builder.add_skill(ResourceRef::skill(format!("skill-{i}")));
                });
            }
        });
        let agent = builder.build();
        assert_eq!(agent.spec.skill_refs.len(), n);
        assert!(agent.validate_spec().is_ok());
    }

    #[test]
    fn switch_cases_carry_typed_conditions() {
        let fetch = TaskRef::new("fetch");
        let task = switch(
            "route",
            [(fetch.field("status").equals(200), "happy".to_string())],
        );
        let TaskKind::Switch(config) = &task.kind else {
            panic!("not a switch");
        };
        assert_eq!(config.cases[0].when, "${ $context[\"fetch\"].status == 200 }");
        assert_eq!(config.cases[0].then, "happy");
    }

    #[test]
    fn workflow_builder_produces_a_valid_document() {
        let builder = WorkflowBuilder::new("nightly-report");
        builder.namespace("reports").version("1.0.0");
        builder.add_task(set(
            "init",
            [("target".to_string(), serde_json::json!("prod"))]
                .into_iter()
                .collect(),
        ));
        let workflow = builder.build();
        assert!(workflow.validate_spec().is_ok());
        assert_eq!(workflow.spec.document.namespace, "reports");
    }
}
