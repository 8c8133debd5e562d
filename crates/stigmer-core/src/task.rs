// Stigmer Core - Workflow task model
//
// A task kind and its config message are 1:1. Nested tasks appear only in
// FOR.do, FORK.branches[] and TRY.try/catch/finally; SWITCH cases branch to
// a named task instead of nesting.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::execution::ExecutionConfig;
use crate::resource::ResourceRef;

/// Call timeout bounds for HTTP_CALL and GRPC_CALL
pub const MIN_CALL_TIMEOUT_SECONDS: u64 = 1;
pub const MAX_CALL_TIMEOUT_SECONDS: u64 = 300;

fn default_call_timeout() -> u64 {
    30
}

/// One step of a workflow document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    #[serde(flatten)]
    pub kind: TaskKind,
}

impl Task {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("task name must not be empty".to_string());
        }
        self.kind.validate(&self.name)
    }
}

/// Task kind plus its config message, adjacently tagged on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "config", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    Set(SetConfig),
    HttpCall(HttpCallConfig),
    GrpcCall(GrpcCallConfig),
    AgentCall(AgentCallConfig),
    Switch(SwitchConfig),
    For(ForConfig),
    Fork(ForkConfig),
    Try(TryConfig),
    Listen(ListenConfig),
    Wait(WaitConfig),
    CallActivity(CallActivityConfig),
    Raise(RaiseConfig),
    Run(RunConfig),
}

impl TaskKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            TaskKind::Set(_) => "SET",
            TaskKind::HttpCall(_) => "HTTP_CALL",
            TaskKind::GrpcCall(_) => "GRPC_CALL",
            TaskKind::AgentCall(_) => "AGENT_CALL",
            TaskKind::Switch(_) => "SWITCH",
            TaskKind::For(_) => "FOR",
            TaskKind::Fork(_) => "FORK",
            TaskKind::Try(_) => "TRY",
            TaskKind::Listen(_) => "LISTEN",
            TaskKind::Wait(_) => "WAIT",
            TaskKind::CallActivity(_) => "CALL_ACTIVITY",
            TaskKind::Raise(_) => "RAISE",
            TaskKind::Run(_) => "RUN",
        }
    }

    fn validate(&self, task_name: &str) -> Result<(), String> {
        match self {
            TaskKind::Set(c) => {
                if c.variables.is_empty() {
                    return Err(format!("SET task '{task_name}' requires at least one variable"));
                }
            }
            TaskKind::HttpCall(c) => {
                validate_call_timeout(task_name, c.timeout_seconds)?;
                if c.url.trim().is_empty() {
                    return Err(format!("HTTP_CALL task '{task_name}' requires a url"));
                }
            }
            TaskKind::GrpcCall(c) => {
                validate_call_timeout(task_name, c.timeout_seconds)?;
                if c.endpoint.trim().is_empty() || c.method.trim().is_empty() {
                    return Err(format!(
                        "GRPC_CALL task '{task_name}' requires endpoint and method"
                    ));
                }
            }
            TaskKind::AgentCall(c) => {
                if c.agent.name.trim().is_empty() {
                    return Err(format!("AGENT_CALL task '{task_name}' requires an agent"));
                }
            }
            TaskKind::Switch(c) => {
                if c.cases.is_empty() {
                    return Err(format!("SWITCH task '{task_name}' requires at least one case"));
                }
            }
            TaskKind::For(c) => {
                if c.each.trim().is_empty() {
                    return Err(format!("FOR task '{task_name}' requires a loop variable"));
                }
                if c.do_.is_empty() {
                    return Err(format!("FOR task '{task_name}' requires a non-empty do list"));
                }
                for t in &c.do_ {
                    t.validate()?;
                }
            }
            TaskKind::Fork(c) => {
                if c.branches.is_empty() {
                    return Err(format!("FORK task '{task_name}' requires branches"));
                }
                for branch in &c.branches {
                    for t in &branch.tasks {
                        t.validate()?;
                    }
                }
            }
            TaskKind::Try(c) => {
                if c.try_.is_empty() {
                    return Err(format!("TRY task '{task_name}' requires a try list"));
                }
                for t in c.try_.iter().chain(&c.catch).chain(&c.finally) {
                    t.validate()?;
                }
            }
            TaskKind::Listen(c) => {
                if c.signal.trim().is_empty() {
                    return Err(format!("LISTEN task '{task_name}' requires a signal name"));
                }
            }
            TaskKind::Wait(c) => {
                if c.duration_seconds == 0 {
                    return Err(format!("WAIT task '{task_name}' requires a non-zero duration"));
                }
            }
            TaskKind::CallActivity(c) => {
                if c.activity.trim().is_empty() {
                    return Err(format!("CALL_ACTIVITY task '{task_name}' requires an activity"));
                }
            }
            TaskKind::Raise(c) => {
                if c.error.trim().is_empty() {
                    return Err(format!("RAISE task '{task_name}' requires an error name"));
                }
            }
            TaskKind::Run(c) => {
                if c.workflow.trim().is_empty() {
                    return Err(format!("RUN task '{task_name}' requires a workflow"));
                }
            }
        }
        Ok(())
    }
}

fn validate_call_timeout(task_name: &str, timeout: u64) -> Result<(), String> {
    if !(MIN_CALL_TIMEOUT_SECONDS..=MAX_CALL_TIMEOUT_SECONDS).contains(&timeout) {
        return Err(format!(
            "task '{task_name}' timeout_seconds must be in [{MIN_CALL_TIMEOUT_SECONDS}, {MAX_CALL_TIMEOUT_SECONDS}], got {timeout}"
        ));
    }
    Ok(())
}

// ============================================================================
// Per-kind config messages
// ============================================================================

/// SET: assign one or more context variables. Values may contain expression refs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetConfig {
    pub variables: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpCallConfig {
    #[serde(default = "default_http_method")]
    pub method: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// May contain expression refs evaluated against the current context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(default = "default_call_timeout")]
    pub timeout_seconds: u64,
}

fn default_http_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrpcCallConfig {
    pub endpoint: String,
    pub service: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default = "default_call_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCallConfig {
    pub agent: ResourceRef,
    /// May contain expression refs
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_config: Option<ExecutionConfig>,
}

/// SWITCH: cases evaluated top-down; the first matching `when` branches to
/// the task named by `then`. No default case means fall through.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwitchConfig {
    pub cases: Vec<SwitchCase>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchCase {
    /// Condition expression, e.g. `${ $context["fetch"].status == 200 }`
    pub when: String,
    /// Name of the task execution continues at
    pub then: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForConfig {
    /// Loop variable name
    pub each: String,
    /// Iterable expression
    #[serde(rename = "in")]
    pub in_: String,
    /// Non-empty nested task list
    #[serde(rename = "do")]
    pub do_: Vec<Task>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForkConfig {
    /// Branches execute concurrently; the task completes when all complete
    pub branches: Vec<ForkBranch>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForkBranch {
    pub name: String,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TryConfig {
    #[serde(rename = "try")]
    pub try_: Vec<Task>,
    /// Runs only on exception from try
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub catch: Vec<Task>,
    /// Always runs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finally: Vec<Task>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListenConfig {
    /// Signal name to suspend on; delivery is at-least-once
    pub signal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaitConfig {
    pub duration_seconds: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallActivityConfig {
    pub activity: String,
    #[serde(default)]
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RaiseConfig {
    pub error: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    /// Slug of the workflow to run
    pub workflow: String,
    #[serde(default)]
    pub input: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_wire_form_is_kind_and_config() {
        let task = Task {
            name: "fetch".to_string(),
            kind: TaskKind::HttpCall(HttpCallConfig {
                method: "GET".to_string(),
                url: "https://example.com".to_string(),
                headers: BTreeMap::new(),
                body: None,
                timeout_seconds: 30,
            }),
        };
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["name"], "fetch");
        assert_eq!(value["kind"], "HTTP_CALL");
        assert_eq!(value["config"]["url"], "https://example.com");
    }

    #[test]
    fn set_requires_a_variable() {
        let task = Task {
            name: "empty".to_string(),
            kind: TaskKind::Set(SetConfig::default()),
        };
        assert!(task.validate().is_err());
    }

    #[test]
    fn call_timeout_bounds_enforced() {
        for (timeout, ok) in [(0, false), (1, true), (300, true), (301, false)] {
            let task = Task {
                name: "call".to_string(),
                kind: TaskKind::HttpCall(HttpCallConfig {
                    method: "GET".to_string(),
                    url: "https://example.com".to_string(),
                    headers: BTreeMap::new(),
                    body: None,
                    timeout_seconds: timeout,
                }),
            };
            assert_eq!(task.validate().is_ok(), ok, "timeout {timeout}");
        }
    }

    #[test]
    fn nested_for_tasks_validate_recursively() {
        let task = Task {
            name: "loop".to_string(),
            kind: TaskKind::For(ForConfig {
                each: "item".to_string(),
                in_: "${ $context[\"init\"].items }".to_string(),
                do_: vec![Task {
                    name: "inner".to_string(),
                    kind: TaskKind::Set(SetConfig::default()),
                }],
            }),
        };
        // the inner SET has no variables, so the whole FOR fails validation
        assert!(task.validate().is_err());
    }

    #[test]
    fn for_requires_non_empty_do() {
        let task = Task {
            name: "loop".to_string(),
            kind: TaskKind::For(ForConfig {
                each: "item".to_string(),
                in_: "${ $context[\"init\"].items }".to_string(),
                do_: vec![],
            }),
        };
        assert!(task.validate().is_err());
    }
}
