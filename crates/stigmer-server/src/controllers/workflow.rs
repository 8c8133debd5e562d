//! Workflow and WorkflowInstance controllers

use std::sync::Arc;

use stigmer_core::{
    Metadata, StigmerResult, Workflow, WorkflowInstance, WorkflowInstanceSpec,
};
use stigmer_store::ResourceStore;

use crate::clients::ResourceClient;
use crate::controllers::{CommandHandler, Pipelines, QueryHandler};
use crate::pipeline::Pipeline;
use crate::steps::{
    BuildNewState, CheckDuplicate, DeleteExisting, EnsureDefaultInstance, LoadExisting,
    LoadForApply, LoadParent, Persist, ResolveSlug, ValidateProto, ValidateSameOrgRule,
};
use crate::transport::{ClientSlot, Router};

pub struct WorkflowWiring {
    pub instance_client: Arc<ClientSlot<ResourceClient<WorkflowInstance>>>,
}

fn default_instance(workflow: &Workflow) -> WorkflowInstance {
    let mut instance = WorkflowInstance {
        metadata: Metadata::named(stigmer_core::default_instance_slug(
            &workflow.metadata.slug,
        )),
        spec: WorkflowInstanceSpec {
            workflow_id: workflow.metadata.id.clone(),
            ..Default::default()
        },
        status: Default::default(),
    };
    instance.metadata.owner_scope = workflow.metadata.owner_scope;
    instance.metadata.org = workflow.metadata.org.clone();
    instance
}

pub(crate) fn workflow_pipelines(
    store: &ResourceStore,
    instance_client: &Arc<ClientSlot<ResourceClient<WorkflowInstance>>>,
) -> Pipelines<Workflow> {
    let ensure_default = Arc::new(EnsureDefaultInstance::<Workflow, WorkflowInstance>::new(
        store.clone(),
        instance_client.clone(),
        |workflow| workflow.status.default_instance_id.as_str(),
        |workflow, id| workflow.status.default_instance_id = id,
        default_instance,
    ));

    Pipelines {
        create: Pipeline::named("workflow.create")
            .step(Arc::new(ValidateProto))
            .step(Arc::new(ResolveSlug))
            .step(Arc::new(CheckDuplicate::new(store.clone())))
            .step(Arc::new(BuildNewState))
            .step(Arc::new(Persist::new(store.clone())))
            .step(ensure_default.clone()),
        update: Pipeline::named("workflow.update")
            .step(Arc::new(ValidateProto))
            .step(Arc::new(ResolveSlug))
            .step(Arc::new(LoadExisting::new(store.clone())))
            .step(Arc::new(BuildNewState))
            .step(Arc::new(Persist::new(store.clone())))
            .step(ensure_default),
        delete: Pipeline::named("workflow.delete")
            .step(Arc::new(LoadExisting::new(store.clone())))
            .step(Arc::new(DeleteExisting::new(store.clone()))),
        apply: Pipeline::named("workflow.apply")
            .step(Arc::new(ValidateProto))
            .step(Arc::new(ResolveSlug))
            .step(Arc::new(LoadForApply::new(store.clone()))),
    }
}

pub(crate) fn instance_pipelines(store: &ResourceStore) -> Pipelines<WorkflowInstance> {
    Pipelines {
        create: Pipeline::named("workflow-instance.create")
            .step(Arc::new(ValidateProto))
            .step(Arc::new(ResolveSlug))
            .step(Arc::new(LoadParent::<WorkflowInstance, Workflow>::new(
                store.clone(),
                |instance| instance.spec.workflow_id.clone(),
            )))
            .step(Arc::new(
                ValidateSameOrgRule::<WorkflowInstance, Workflow>::default(),
            ))
            .step(Arc::new(CheckDuplicate::new(store.clone())))
            .step(Arc::new(BuildNewState))
            .step(Arc::new(Persist::new(store.clone()))),
        update: Pipeline::named("workflow-instance.update")
            .step(Arc::new(ValidateProto))
            .step(Arc::new(ResolveSlug))
            .step(Arc::new(LoadExisting::new(store.clone())))
            .step(Arc::new(LoadParent::<WorkflowInstance, Workflow>::new(
                store.clone(),
                |instance| instance.spec.workflow_id.clone(),
            )))
            .step(Arc::new(
                ValidateSameOrgRule::<WorkflowInstance, Workflow>::default(),
            ))
            .step(Arc::new(BuildNewState))
            .step(Arc::new(Persist::new(store.clone()))),
        delete: Pipeline::named("workflow-instance.delete")
            .step(Arc::new(LoadExisting::new(store.clone())))
            .step(Arc::new(DeleteExisting::new(store.clone()))),
        apply: Pipeline::named("workflow-instance.apply")
            .step(Arc::new(ValidateProto))
            .step(Arc::new(ResolveSlug))
            .step(Arc::new(LoadForApply::new(store.clone()))),
    }
}

pub fn register(router: &Router, store: &ResourceStore) -> StigmerResult<WorkflowWiring> {
    let instance_client = Arc::new(ClientSlot::new());

    router.register(Arc::new(CommandHandler::new(
        store.clone(),
        workflow_pipelines(store, &instance_client),
    )))?;
    router.register(Arc::new(QueryHandler::<Workflow>::new(store.clone())))?;

    router.register(Arc::new(CommandHandler::new(
        store.clone(),
        instance_pipelines(store),
    )))?;
    router.register(Arc::new(
        QueryHandler::<WorkflowInstance>::new(store.clone())
            .with_parent(|instance| Some(instance.spec.workflow_id.clone())),
    ))?;

    Ok(WorkflowWiring { instance_client })
}
