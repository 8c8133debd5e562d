// Stigmer SDK - Authoring surface
//
// Programs declare Skills (directories), Agents, and Workflows against a
// per-run ResourceContext; synthesis sorts the declared graph and deploys
// it through the control plane in dependency order. Expression strings
// never appear in authoring code; typed refs from stigmer-core render
// them.

pub mod builders;
pub mod context;
pub mod synth;

pub use builders::{
    agent_call, for_each, fork, http_call, listen, raise, run_workflow, set, switch, try_catch,
    wait, AgentBuilder, WorkflowBuilder,
};
pub use context::{Registration, ResourceContext, ResourceId};
pub use synth::{deploy, plan, DeployAction, DeployPlan, DeployResult, PlanStep};

// Typed expression surface, re-exported so authors need one import
pub use stigmer_core::{Condition, ExprRef, ResourceRef, TaskRef};
