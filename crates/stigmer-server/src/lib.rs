// Stigmer Server - Control plane
//
// The in-process transport, the request pipeline and its standard step
// library, the per-kind resource controllers, the execution orchestration
// workflow, and the daemon lifecycle that wires them together.

pub mod clients;
pub mod config;
pub mod controllers;
pub mod daemon;
pub mod engine_cell;
pub mod logs;
pub mod net;
pub mod orchestrator;
pub mod pipeline;
pub mod steps;
pub mod subscribe;
pub mod transport;

pub use clients::{command_service, query_service, PushedArtifact, ResourceClient, SkillArtifactClient};
pub use config::Config;
pub use daemon::{ControlPlane, EngineMode};
pub use engine_cell::EngineCell;
pub use pipeline::{Pipeline, PipelineError, RequestContext, Step};
pub use subscribe::SubscribeHub;
pub use transport::{Channel, ClientSlot, Handler, Interceptor, Request, Response, Router};
