//! Execution controllers
//!
//! Both execution kinds share the status-update surface: every change is
//! written to the store in arrival order, then republished to subscribers.
//! WorkflowExecution creation ends with the StartWorkflow step; degraded
//! engines leave the record PENDING. AgentExecution creation publishes a
//! created event so the agent runner picks the work up.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use stigmer_core::{
    Agent, AgentExecution, ExecutionPhase, Phased, Resource, StigmerError, StigmerResult,
    TaskProgress, WorkflowExecution, WorkflowInstance,
};
use stigmer_store::ResourceStore;

use crate::clients::ResourceClient;
use crate::controllers::{CommandExtension, CommandHandler, Pipelines, QueryHandler};
use crate::engine_cell::EngineCell;
use crate::pipeline::Pipeline;
use crate::steps::{
    BuildNewState, CheckDuplicate, DeleteExisting, LoadExisting, LoadForApply, LoadParent,
    Persist, PersistWithCompensation, ResolveExecutionInstance, ResolveSlug, SetInitialPhase,
    StartWorkflow, ValidateProto, ValidateSameOrgRule,
};
use crate::subscribe::SubscribeHub;
use crate::transport::{ClientSlot, Response, Router};

pub struct ExecutionWiring {
    /// Used by the default-instance recovery inside the execution pipeline
    pub workflow_instance_client: Arc<ClientSlot<ResourceClient<WorkflowInstance>>>,
}

/// UpdateStatus and Cancel, shared by both execution kinds.
///
/// Status writes are applied in the order they arrive and republished to
/// subscribers in that same order; terminal phases absorb later updates.
struct ExecutionExtension<R: Resource + Phased> {
    store: ResourceStore,
    hub: SubscribeHub,
    /// Present for workflow executions so Cancel also reaches the engine
    engine: Option<EngineCell>,
    _marker: std::marker::PhantomData<fn() -> R>,
}

impl<R: Resource + Phased> ExecutionExtension<R> {
    fn new(store: ResourceStore, hub: SubscribeHub, engine: Option<EngineCell>) -> Self {
        Self {
            store,
            hub,
            engine,
            _marker: std::marker::PhantomData,
        }
    }

    fn publish(&self, execution: &R) -> StigmerResult<()> {
        let value =
            serde_json::to_value(execution).map_err(|e| StigmerError::internal(e.to_string()))?;
        self.hub.publish(&execution.metadata().id, value);
        Ok(())
    }

    fn update_status(&self, body: Value) -> StigmerResult<Value> {
        let id = body
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| StigmerError::invalid("status update needs an id"))?;
        let phase: ExecutionPhase =
            serde_json::from_value(body.get("phase").cloned().unwrap_or(Value::Null))
                .map_err(|e| StigmerError::invalid(format!("bad phase: {e}")))?;

        let mut execution = self.store.get::<R>(id)?;
        let applied = execution.transition(phase);
        if !applied && execution.phase() != phase {
            tracing::debug!(%id, from = %execution.phase(), to = %phase, "phase transition ignored");
        }
        if let Some(message) = body.get("message").and_then(Value::as_str) {
            execution.set_status_message(message);
        }
        if let Some(task) = body.get("task") {
            let progress: TaskProgress = serde_json::from_value(task.clone())
                .map_err(|e| StigmerError::invalid(format!("bad task progress: {e}")))?;
            execution.upsert_task(progress);
        }
        execution.metadata_mut().updated_at = Some(chrono::Utc::now());

        self.store.save(&execution)?;
        self.publish(&execution)?;
        serde_json::to_value(&execution).map_err(|e| StigmerError::internal(e.to_string()))
    }

    async fn cancel(&self, body: Value) -> StigmerResult<Value> {
        let id = body
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| StigmerError::invalid("cancel needs an id"))?;

        if let Some(cell) = &self.engine {
            if let Some(engine) = cell.get() {
                if let Err(e) = engine.cancel_workflow(id).await {
                    tracing::warn!(%id, error = %e, "engine cancel failed; record still cancelled");
                }
            }
        }

        self.update_status(json!({ "id": id, "phase": ExecutionPhase::Cancelled }))
    }
}

#[async_trait]
impl<R: Resource + Phased> CommandExtension<R> for ExecutionExtension<R> {
    async fn handle(&self, method: &str, body: Value) -> StigmerResult<Option<Response>> {
        match method {
            "UpdateStatus" => Ok(Some(Response::Unary(self.update_status(body)?))),
            "Cancel" => Ok(Some(Response::Unary(self.cancel(body).await?))),
            _ => Ok(None),
        }
    }
}

pub(crate) fn workflow_execution_pipelines(
    store: &ResourceStore,
    hub: &SubscribeHub,
    engine: &EngineCell,
    instance_client: &Arc<ClientSlot<ResourceClient<WorkflowInstance>>>,
    orchestrator_queue: &str,
    runner_queue: &str,
) -> Pipelines<WorkflowExecution> {
    Pipelines {
        create: Pipeline::named("workflow-execution.create")
            .step(Arc::new(ValidateProto))
            .step(Arc::new(ResolveSlug))
            .step(Arc::new(ResolveExecutionInstance::new(
                store.clone(),
                instance_client.clone(),
            )))
            .step(Arc::new(LoadParent::<WorkflowExecution, WorkflowInstance>::new(
                store.clone(),
                |execution| execution.spec.instance_id.clone(),
            )))
            .step(Arc::new(
                ValidateSameOrgRule::<WorkflowExecution, WorkflowInstance>::default(),
            ))
            .step(Arc::new(CheckDuplicate::new(store.clone())))
            .step(Arc::new(BuildNewState))
            .step(Arc::new(SetInitialPhase))
            .step(Arc::new(PersistWithCompensation::new(
                store.clone(),
                hub.clone(),
            )))
            .step(Arc::new(StartWorkflow::new(
                engine.clone(),
                orchestrator_queue.to_string(),
                runner_queue.to_string(),
            ))),
        update: Pipeline::named("workflow-execution.update")
            .step(Arc::new(ValidateProto))
            .step(Arc::new(ResolveSlug))
            .step(Arc::new(LoadExisting::new(store.clone())))
            .step(Arc::new(BuildNewState))
            .step(Arc::new(Persist::new(store.clone()))),
        delete: Pipeline::named("workflow-execution.delete")
            .step(Arc::new(LoadExisting::new(store.clone())))
            .step(Arc::new(DeleteExisting::new(store.clone()))),
        apply: Pipeline::named("workflow-execution.apply")
            .step(Arc::new(ValidateProto))
            .step(Arc::new(ResolveSlug))
            .step(Arc::new(LoadForApply::new(store.clone()))),
    }
}

pub(crate) fn agent_execution_pipelines(store: &ResourceStore) -> Pipelines<AgentExecution> {
    Pipelines {
        create: Pipeline::named("agent-execution.create")
            .step(Arc::new(ValidateProto))
            .step(Arc::new(ResolveSlug))
            .step(Arc::new(LoadParent::<AgentExecution, Agent>::new(
                store.clone(),
                |execution| execution.spec.agent_id.clone(),
            )))
            .step(Arc::new(ValidateSameOrgRule::<AgentExecution, Agent>::default()))
            .step(Arc::new(CheckDuplicate::new(store.clone())))
            .step(Arc::new(BuildNewState))
            .step(Arc::new(SetInitialPhase))
            .step(Arc::new(Persist::new(store.clone()))),
        update: Pipeline::named("agent-execution.update")
            .step(Arc::new(ValidateProto))
            .step(Arc::new(ResolveSlug))
            .step(Arc::new(LoadExisting::new(store.clone())))
            .step(Arc::new(BuildNewState))
            .step(Arc::new(Persist::new(store.clone()))),
        delete: Pipeline::named("agent-execution.delete")
            .step(Arc::new(LoadExisting::new(store.clone())))
            .step(Arc::new(DeleteExisting::new(store.clone()))),
        apply: Pipeline::named("agent-execution.apply")
            .step(Arc::new(ValidateProto))
            .step(Arc::new(ResolveSlug))
            .step(Arc::new(LoadForApply::new(store.clone()))),
    }
}

pub fn register(
    router: &Router,
    store: &ResourceStore,
    hub: &SubscribeHub,
    engine: &EngineCell,
    orchestrator_queue: &str,
    runner_queue: &str,
) -> StigmerResult<ExecutionWiring> {
    let workflow_instance_client = Arc::new(ClientSlot::new());

    // WorkflowExecution
    router.register(Arc::new(
        CommandHandler::new(
            store.clone(),
            workflow_execution_pipelines(
                store,
                hub,
                engine,
                &workflow_instance_client,
                orchestrator_queue,
                runner_queue,
            ),
        )
        .with_extension(ExecutionExtension::<WorkflowExecution>::new(
            store.clone(),
            hub.clone(),
            Some(engine.clone()),
        )),
    ))?;
    router.register(Arc::new(
        QueryHandler::<WorkflowExecution>::new(store.clone())
            .with_parent(|execution| Some(execution.spec.instance_id.clone()))
            .with_subscribe(hub.clone()),
    ))?;

    // AgentExecution
    let created_hub = hub.clone();
    router.register(Arc::new(
        CommandHandler::new(store.clone(), agent_execution_pipelines(store))
            .with_post_create(move |execution: &AgentExecution| {
                created_hub.publish_agent_created(&execution.metadata.id);
            })
            .with_extension(ExecutionExtension::<AgentExecution>::new(
                store.clone(),
                hub.clone(),
                None,
            )),
    ))?;
    router.register(Arc::new(
        QueryHandler::<AgentExecution>::new(store.clone())
            .with_parent(|execution| Some(execution.spec.agent_id.clone()))
            .with_subscribe(hub.clone()),
    ))?;

    Ok(ExecutionWiring {
        workflow_instance_client,
    })
}
