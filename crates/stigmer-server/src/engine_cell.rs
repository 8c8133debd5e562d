//! Atomic engine-client cell
//!
//! The engine client is read with a nil-check everywhere it is used. The
//! cell is written at most by `connect`; on shutdown it is left pointing at
//! the now-closed client rather than swapped to nil, so readers never
//! observe a torn state.

use arc_swap::ArcSwapOption;
use std::sync::Arc;

use stigmer_engine::Engine;

struct Slot {
    engine: Arc<dyn Engine>,
}

/// Shared, lock-free handle to the (possibly absent) engine client
#[derive(Clone, Default)]
pub struct EngineCell {
    inner: Arc<ArcSwapOption<Slot>>,
}

impl EngineCell {
    /// A cell with no engine connected; every read degrades gracefully
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn connect(&self, engine: Arc<dyn Engine>) {
        self.inner.store(Some(Arc::new(Slot { engine })));
    }

    /// Nil-checked read
    pub fn get(&self) -> Option<Arc<dyn Engine>> {
        self.inner.load_full().map(|slot| slot.engine.clone())
    }

    pub fn is_connected(&self) -> bool {
        self.inner.load().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use stigmer_engine::{EngineResult, StartWorkflowOptions, TaskToken};

    struct NoopEngine;

    #[async_trait]
    impl Engine for NoopEngine {
        async fn start_workflow(&self, _opts: StartWorkflowOptions) -> EngineResult<String> {
            Ok("run".to_string())
        }

        async fn signal_workflow(
            &self,
            _workflow_id: &str,
            _name: &str,
            _payload: Value,
        ) -> EngineResult<()> {
            Ok(())
        }

        async fn cancel_workflow(&self, _workflow_id: &str) -> EngineResult<()> {
            Ok(())
        }

        async fn complete_activity(
            &self,
            _token: &TaskToken,
            _result: Result<Value, String>,
        ) -> EngineResult<()> {
            Ok(())
        }
    }

    #[test]
    fn empty_cell_reads_none() {
        let cell = EngineCell::empty();
        assert!(cell.get().is_none());
        assert!(!cell.is_connected());
    }

    #[test]
    fn connected_cell_reads_some() {
        let cell = EngineCell::empty();
        cell.connect(Arc::new(NoopEngine));
        assert!(cell.get().is_some());
        assert!(cell.is_connected());
    }
}
