//! Command implementations
//!
//! Every command except `serve` runs an embedded control plane against the
//! local data dir: the single-tenant deployment has one process owning the
//! store, and that process is whichever command is running. `serve` keeps
//! the same assembly alive with the network listener attached.

pub mod apply;
pub mod get;
pub mod logs;
pub mod new;
pub mod run;
pub mod serve;

use stigmer_runner::{RunnerHandle, RunnerOptions};
use stigmer_server::{Channel, Config, ControlPlane, EngineMode};

/// An embedded control plane plus its runner workers
pub struct Session {
    plane: ControlPlane,
    runner: Option<RunnerHandle>,
}

impl Session {
    pub async fn open() -> anyhow::Result<Self> {
        Self::open_with(RunnerOptions::default()).await
    }

    pub async fn open_with(options: RunnerOptions) -> anyhow::Result<Self> {
        let config = Config::from_env();
        let plane = ControlPlane::start(config, EngineMode::Local).await?;

        let runner = match plane.local_engine() {
            Some(engine) => Some(stigmer_runner::attach(
                &engine,
                &plane.channel(),
                &plane.hub(),
                &plane.engine_cell(),
                &plane.config().runner_queue,
                options,
            )?),
            None => None,
        };

        Ok(Self { plane, runner })
    }

    pub fn channel(&self) -> Channel {
        self.plane.channel()
    }

    pub async fn close(self) -> anyhow::Result<()> {
        if let Some(runner) = self.runner {
            runner.shutdown();
        }
        self.plane.shutdown().await?;
        Ok(())
    }
}
