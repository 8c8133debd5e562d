//! Control-plane lifecycle
//!
//! Startup order matters and is fixed here: open the store, register every
//! controller, serve (freezing the registry), inject sibling clients into
//! their slots, connect the engine, attach the orchestrator worker (its
//! local activity calls back through the transport, so the transport must
//! already be serving), and finally the network listener. Shutdown is the
//! strict reverse: listener, workers, engine client, store handle.

use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{info, warn};

use stigmer_core::{StigmerError, StigmerResult};
use stigmer_engine::{Engine, LocalEngine};
use stigmer_store::{ArtifactStore, ResourceStore, StoreGuard};

use crate::clients::ResourceClient;
use crate::config::Config;
use crate::controllers;
use crate::engine_cell::EngineCell;
use crate::orchestrator::orchestrator_worker;
use crate::subscribe::SubscribeHub;
use crate::transport::{Channel, Router};

/// How the daemon reaches its workflow engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    /// In-process engine, attached at startup
    Local,
    /// No engine: creates degrade, executions stay PENDING
    Disabled,
}

pub struct ControlPlane {
    config: Config,
    guard: Option<StoreGuard>,
    store: ResourceStore,
    artifacts: ArtifactStore,
    hub: SubscribeHub,
    engine_cell: EngineCell,
    local_engine: Option<LocalEngine>,
    channel: Channel,
    listener: Option<Arc<Notify>>,
}

impl ControlPlane {
    pub async fn start(config: Config, mode: EngineMode) -> StigmerResult<Self> {
        // 1. the store opens first and closes last
        std::fs::create_dir_all(config.workspace_dir())
            .map_err(|e| StigmerError::internal(format!("workspace dir: {e}")))?;
        let guard = StoreGuard::open(config.kv_path())?;
        let store = guard.store();
        let artifacts = ArtifactStore::open(config.artifacts_dir())?;
        let hub = SubscribeHub::new();
        let engine_cell = EngineCell::empty();

        // 2. register every controller, then freeze
        let router = Router::new();
        controllers::skill::register(&router, &store, &artifacts)?;
        let agent_wiring = controllers::agent::register(&router, &store)?;
        let workflow_wiring = controllers::workflow::register(&router, &store)?;
        let execution_wiring = controllers::execution::register(
            &router,
            &store,
            &hub,
            &engine_cell,
            &config.orchestrator_queue,
            &config.runner_queue,
        )?;
        controllers::signal::register(&router, &store, &engine_cell)?;
        let channel = router.serve();

        // 3. setter injection: sibling clients exist only now
        agent_wiring
            .instance_client
            .set(ResourceClient::new(channel.clone()))?;
        workflow_wiring
            .instance_client
            .set(ResourceClient::new(channel.clone()))?;
        execution_wiring
            .workflow_instance_client
            .set(ResourceClient::new(channel.clone()))?;

        // 4. engine and orchestrator worker, after the transport serves
        let local_engine = match mode {
            EngineMode::Local => {
                let engine = LocalEngine::new();
                let worker = orchestrator_worker(&config.orchestrator_queue, channel.clone())
                    .map_err(|e| StigmerError::internal(e.to_string()))?;
                engine
                    .attach_orchestrator(worker)
                    .map_err(|e| StigmerError::internal(e.to_string()))?;
                engine_cell.connect(Arc::new(engine.clone()) as Arc<dyn Engine>);
                Some(engine)
            }
            EngineMode::Disabled => {
                warn!("engine disabled; executions will stay PENDING");
                None
            }
        };

        info!(data_dir = %config.data_dir.display(), "control plane serving");
        Ok(Self {
            config,
            guard: Some(guard),
            store,
            artifacts,
            hub,
            engine_cell,
            local_engine,
            channel,
            listener: None,
        })
    }

    /// Bind the network listener. Started last; stopped first.
    pub async fn serve_network(&mut self) -> StigmerResult<u16> {
        let addr = format!("127.0.0.1:{}", self.config.grpc_port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| StigmerError::unavailable(format!("bind {addr}: {e}")))?;
        let port = listener
            .local_addr()
            .map_err(|e| StigmerError::internal(e.to_string()))?
            .port();
        let stop = Arc::new(Notify::new());
        tokio::spawn(crate::net::serve(listener, self.channel.clone(), stop.clone()));
        self.listener = Some(stop);
        info!(%port, "network listener up");
        Ok(port)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }

    pub fn store(&self) -> ResourceStore {
        self.store.clone()
    }

    pub fn artifacts(&self) -> ArtifactStore {
        self.artifacts.clone()
    }

    pub fn hub(&self) -> SubscribeHub {
        self.hub.clone()
    }

    pub fn engine_cell(&self) -> EngineCell {
        self.engine_cell.clone()
    }

    /// The in-process engine, for attaching the runner worker
    pub fn local_engine(&self) -> Option<LocalEngine> {
        self.local_engine.clone()
    }

    /// Strict LIFO teardown. The engine cell is deliberately left pointing
    /// at the stopped engine; readers nil-check, they never observe a
    /// half-swapped cell.
    pub async fn shutdown(mut self) -> StigmerResult<()> {
        if let Some(stop) = self.listener.take() {
            stop.notify_waiters();
        }
        if let Some(engine) = self.local_engine.take() {
            engine.shutdown();
        }
        if let Some(guard) = self.guard.take() {
            guard.close()?;
        }
        info!("control plane stopped");
        Ok(())
    }
}
