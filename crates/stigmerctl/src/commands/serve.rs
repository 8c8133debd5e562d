//! Serve command: the long-lived daemon
//!
//! Rotates logs, points the subscriber at the live log file, starts the
//! control plane with both workers, binds the network listener, and tears
//! everything down in reverse on ctrl-c.

use std::fs::File;
use std::io::Write;
use std::sync::{Arc, Mutex};

use tracing::info;

use stigmer_runner::RunnerOptions;
use stigmer_server::logs::rotate;
use stigmer_server::{Config, ControlPlane, EngineMode};

/// MakeWriter target cloning a shared handle to the live log
struct LogWriter(Arc<Mutex<File>>);

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.0.lock() {
            Ok(mut file) => file.write(buf),
            Err(_) => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.0.lock() {
            Ok(mut file) => file.flush(),
            Err(_) => Ok(()),
        }
    }
}

pub async fn execute(port: Option<u16>) -> anyhow::Result<()> {
    let mut config = Config::from_env();
    if let Some(port) = port {
        config.grpc_port = port;
    }

    // Rotation happens before the subscriber exists so the archive never
    // interleaves with fresh lines.
    let live = rotate(&config.logs_dir())?;
    let file = Arc::new(Mutex::new(File::options().append(true).open(&live)?));
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_ansi(false)
        .with_writer(move || LogWriter(file.clone()))
        .init();

    let mut plane = ControlPlane::start(config, EngineMode::Local).await?;

    let runner = match plane.local_engine() {
        Some(engine) => Some(stigmer_runner::attach(
            &engine,
            &plane.channel(),
            &plane.hub(),
            &plane.engine_cell(),
            &plane.config().runner_queue,
            RunnerOptions::default(),
        )?),
        None => None,
    };

    let port = plane.serve_network().await?;
    eprintln!("stigmer daemon up on port {port} (logs: {})", live.display());
    info!(%port, "daemon ready");

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    // LIFO: listener and workers stop inside shutdown; the runner loop
    // goes first since it feeds the engine.
    if let Some(runner) = runner {
        runner.shutdown();
    }
    plane.shutdown().await?;
    Ok(())
}
