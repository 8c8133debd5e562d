// Stigmer Engine - Durable workflow engine contract
//
// The control plane and the runner both program against the traits here:
// an Engine client (start/signal/cancel/complete-by-token) and two worker
// shapes bound to disjoint task queues. The local module provides the
// in-process implementation used by the local deployment and the tests.

pub mod client;
pub mod local;
pub mod worker;

pub use client::{
    Engine, EngineError, EngineResult, StartWorkflowOptions, TaskToken,
    DEFAULT_ORCHESTRATOR_QUEUE, DEFAULT_RUNNER_QUEUE, MEMO_RUNNER_QUEUE,
};
pub use local::LocalEngine;
pub use worker::{
    Activity, ActivityContext, ActivityOutcome, OrchestratorWorker, RunnerWorker,
    WorkflowContext, WorkflowDefinition,
};
