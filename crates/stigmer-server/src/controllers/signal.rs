//! Signal controllers
//!
//! A Signal is persisted first (so nested Listen tasks can poll it), then
//! delivered to the engine to wake workflow-level Listen suspensions.
//! Signals are events: many may share a name, so the slug namespace rule
//! does not apply and there is no duplicate check.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use stigmer_core::{Signal, StigmerResult, WorkflowExecution};
use stigmer_store::ResourceStore;

use crate::controllers::{CommandHandler, Pipelines, QueryHandler};
use crate::engine_cell::EngineCell;
use crate::pipeline::{Pipeline, RequestContext, Step};
use crate::steps::{
    BuildNewState, DeleteExisting, LoadExisting, LoadForApply, LoadParent, Persist, ResolveSlug,
    ValidateProto,
};
use crate::transport::Router;

/// Forward the persisted signal to the engine. Engine absent: the record
/// alone serves nested Listen polls, so this degrades to a warning.
struct DeliverSignal {
    engine: EngineCell,
}

#[async_trait]
impl Step<Signal> for DeliverSignal {
    fn name(&self) -> &'static str {
        "DeliverSignal"
    }

    async fn execute(&self, ctx: &mut RequestContext<Signal>) -> StigmerResult<()> {
        let signal = ctx.effective();
        let Some(engine) = self.engine.get() else {
            warn!(
                signal = %signal.spec.signal_name,
                execution = %signal.spec.execution_id,
                "engine not connected; signal persisted only"
            );
            return Ok(());
        };
        if let Err(e) = engine
            .signal_workflow(
                &signal.spec.execution_id,
                &signal.spec.signal_name,
                signal.spec.payload.clone(),
            )
            .await
        {
            // At-least-once delivery is satisfied by the persisted record;
            // an engine miss only matters for workflow-level waits.
            warn!(
                signal = %signal.spec.signal_name,
                execution = %signal.spec.execution_id,
                error = %e,
                "engine signal delivery failed"
            );
        }
        Ok(())
    }
}

fn pipelines(store: &ResourceStore, engine: &EngineCell) -> Pipelines<Signal> {
    Pipelines {
        create: Pipeline::named("signal.create")
            .step(Arc::new(ValidateProto))
            .step(Arc::new(ResolveSlug))
            .step(Arc::new(LoadParent::<Signal, WorkflowExecution>::new(
                store.clone(),
                |signal| signal.spec.execution_id.clone(),
            )))
            .step(Arc::new(BuildNewState))
            .step(Arc::new(Persist::new(store.clone())))
            .step(Arc::new(DeliverSignal {
                engine: engine.clone(),
            })),
        update: Pipeline::named("signal.update")
            .step(Arc::new(ValidateProto))
            .step(Arc::new(ResolveSlug))
            .step(Arc::new(LoadExisting::new(store.clone())))
            .step(Arc::new(BuildNewState))
            .step(Arc::new(Persist::new(store.clone()))),
        delete: Pipeline::named("signal.delete")
            .step(Arc::new(LoadExisting::new(store.clone())))
            .step(Arc::new(DeleteExisting::new(store.clone()))),
        apply: Pipeline::named("signal.apply")
            .step(Arc::new(ValidateProto))
            .step(Arc::new(ResolveSlug))
            .step(Arc::new(LoadForApply::new(store.clone()))),
    }
}

pub fn register(router: &Router, store: &ResourceStore, engine: &EngineCell) -> StigmerResult<()> {
    router.register(Arc::new(CommandHandler::new(
        store.clone(),
        pipelines(store, engine),
    )))?;
    router.register(Arc::new(
        QueryHandler::<Signal>::new(store.clone())
            .with_parent(|signal| Some(signal.spec.execution_id.clone())),
    ))?;
    Ok(())
}
