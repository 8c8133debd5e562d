//! Agent and AgentInstance controllers

use std::sync::Arc;

use stigmer_core::{
    Agent, AgentInstance, AgentInstanceSpec, Metadata, StigmerResult,
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

/// Sibling-client slots filled by the daemon after serve
pub struct AgentWiring {
    pub instance_client: Arc<ClientSlot<ResourceClient<AgentInstance>>>,
}

fn default_instance(agent: &Agent) -> AgentInstance {
    let mut instance = AgentInstance {
        metadata: Metadata::named(stigmer_core::default_instance_slug(&agent.metadata.slug)),
        spec: AgentInstanceSpec {
            agent_id: agent.metadata.id.clone(),
            environment_refs: Vec::new(),
        },
        status: Default::default(),
    };
    instance.metadata.owner_scope = agent.metadata.owner_scope;
    instance.metadata.org = agent.metadata.org.clone();
    instance
}

pub(crate) fn agent_pipelines(
    store: &ResourceStore,
    instance_client: &Arc<ClientSlot<ResourceClient<AgentInstance>>>,
) -> Pipelines<Agent> {
    let ensure_default = Arc::new(EnsureDefaultInstance::<Agent, AgentInstance>::new(
        store.clone(),
        instance_client.clone(),
        |agent| agent.status.default_instance_id.as_str(),
        |agent, id| agent.status.default_instance_id = id,
        default_instance,
    ));

    Pipelines {
        create: Pipeline::named("agent.create")
            .step(Arc::new(ValidateProto))
            .step(Arc::new(ResolveSlug))
            .step(Arc::new(CheckDuplicate::new(store.clone())))
            .step(Arc::new(BuildNewState))
            .step(Arc::new(Persist::new(store.clone())))
            .step(ensure_default.clone()),
        update: Pipeline::named("agent.update")
            .step(Arc::new(ValidateProto))
            .step(Arc::new(ResolveSlug))
            .step(Arc::new(LoadExisting::new(store.clone())))
            .step(Arc::new(BuildNewState))
            .step(Arc::new(Persist::new(store.clone())))
            .step(ensure_default),
        delete: Pipeline::named("agent.delete")
            .step(Arc::new(LoadExisting::new(store.clone())))
            .step(Arc::new(DeleteExisting::new(store.clone()))),
        apply: Pipeline::named("agent.apply")
            .step(Arc::new(ValidateProto))
            .step(Arc::new(ResolveSlug))
            .step(Arc::new(LoadForApply::new(store.clone()))),
    }
}

pub(crate) fn instance_pipelines(store: &ResourceStore) -> Pipelines<AgentInstance> {
    Pipelines {
        create: Pipeline::named("agent-instance.create")
            .step(Arc::new(ValidateProto))
            .step(Arc::new(ResolveSlug))
            .step(Arc::new(LoadParent::<AgentInstance, Agent>::new(
                store.clone(),
                |instance| instance.spec.agent_id.clone(),
            )))
            .step(Arc::new(ValidateSameOrgRule::<AgentInstance, Agent>::default()))
            .step(Arc::new(CheckDuplicate::new(store.clone())))
            .step(Arc::new(BuildNewState))
            .step(Arc::new(Persist::new(store.clone()))),
        update: Pipeline::named("agent-instance.update")
            .step(Arc::new(ValidateProto))
            .step(Arc::new(ResolveSlug))
            .step(Arc::new(LoadExisting::new(store.clone())))
            .step(Arc::new(LoadParent::<AgentInstance, Agent>::new(
                store.clone(),
                |instance| instance.spec.agent_id.clone(),
            )))
            .step(Arc::new(ValidateSameOrgRule::<AgentInstance, Agent>::default()))
            .step(Arc::new(BuildNewState))
            .step(Arc::new(Persist::new(store.clone()))),
        delete: Pipeline::named("agent-instance.delete")
            .step(Arc::new(LoadExisting::new(store.clone())))
            .step(Arc::new(DeleteExisting::new(store.clone()))),
        apply: Pipeline::named("agent-instance.apply")
            .step(Arc::new(ValidateProto))
            .step(Arc::new(ResolveSlug))
            .step(Arc::new(LoadForApply::new(store.clone()))),
    }
}

pub fn register(router: &Router, store: &ResourceStore) -> StigmerResult<AgentWiring> {
    let instance_client = Arc::new(ClientSlot::new());

    router.register(Arc::new(CommandHandler::new(
        store.clone(),
        agent_pipelines(store, &instance_client),
    )))?;
    router.register(Arc::new(QueryHandler::<Agent>::new(store.clone())))?;

    router.register(Arc::new(CommandHandler::new(
        store.clone(),
        instance_pipelines(store),
    )))?;
    router.register(Arc::new(
        QueryHandler::<AgentInstance>::new(store.clone())
            .with_parent(|instance| Some(instance.spec.agent_id.clone())),
    ))?;

    Ok(AgentWiring { instance_client })
}
