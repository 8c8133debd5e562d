//! Daemon configuration
//!
//! Every recognized option comes from the environment with a sensible local
//! default; the CLI can override the data dir explicitly.

use std::path::{Path, PathBuf};

use stigmer_engine::{DEFAULT_ORCHESTRATOR_QUEUE, DEFAULT_RUNNER_QUEUE};

/// Default port shared by all in-process services
pub const DEFAULT_GRPC_PORT: u16 = 50551;

#[derive(Debug, Clone)]
pub struct Config {
    /// Persistence root, `~/.stigmer/data` unless overridden by `DATA_DIR`
    pub data_dir: PathBuf,

    /// Network listener port (`GRPC_PORT`)
    pub grpc_port: u16,

    /// Workflow-engine endpoint (`ENGINE_HOST_PORT`, `ENGINE_NAMESPACE`)
    pub engine_host_port: String,
    pub engine_namespace: String,

    /// Task-queue names (`ORCHESTRATOR_QUEUE`, `RUNNER_QUEUE`)
    pub orchestrator_queue: String,
    pub runner_queue: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            grpc_port: DEFAULT_GRPC_PORT,
            engine_host_port: "localhost:7233".to_string(),
            engine_namespace: "default".to_string(),
            orchestrator_queue: DEFAULT_ORCHESTRATOR_QUEUE.to_string(),
            runner_queue: DEFAULT_RUNNER_QUEUE.to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            grpc_port: std::env::var("GRPC_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.grpc_port),
            engine_host_port: env_or("ENGINE_HOST_PORT", defaults.engine_host_port),
            engine_namespace: env_or("ENGINE_NAMESPACE", defaults.engine_namespace),
            orchestrator_queue: env_or("ORCHESTRATOR_QUEUE", defaults.orchestrator_queue),
            runner_queue: env_or("RUNNER_QUEUE", defaults.runner_queue),
        }
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// KV store location
    pub fn kv_path(&self) -> PathBuf {
        self.data_dir.join("kv")
    }

    /// Content-addressed Skill artifacts
    pub fn artifacts_dir(&self) -> PathBuf {
        self.data_dir.join("artifacts")
    }

    /// Live and rotated daemon logs
    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /// Bind-mounted into the sandboxed runtime for session reuse
    pub fn workspace_dir(&self) -> PathBuf {
        self.data_dir.join("workspace")
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or(default)
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| Path::new(".").to_path_buf())
        .join(".stigmer")
        .join("data")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_hang_off_the_data_dir() {
        let config = Config::default().with_data_dir("/tmp/stigmer-test");
        assert_eq!(config.kv_path(), PathBuf::from("/tmp/stigmer-test/kv"));
        assert_eq!(config.logs_dir(), PathBuf::from("/tmp/stigmer-test/logs"));
        assert_eq!(
            config.artifacts_dir(),
            PathBuf::from("/tmp/stigmer-test/artifacts")
        );
    }

    #[test]
    fn queue_names_default_to_the_well_known_pair() {
        let config = Config::default();
        assert_eq!(config.orchestrator_queue, "workflow_execution_orchestrator");
        assert_eq!(config.runner_queue, "workflow_execution_runner");
    }
}
