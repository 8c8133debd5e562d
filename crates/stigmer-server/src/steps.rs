//! Standard step library
//!
//! Every controller composes its pipelines from these steps. Ordering
//! rules the pipelines must respect:
//!
//! - ResolveSlug before any step that indexes by slug (CheckDuplicate,
//!   LoadForApply, LoadExisting)
//! - ValidateProto before any step that dereferences input fields
//! - Persist before StartWorkflow
//! - LoadForApply before the create branch's CheckDuplicate

use async_trait::async_trait;
use serde_json::json;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

use stigmer_core::{
    default_instance_slug, generate_id, normalize_slug, ExecutionPhase, OwnerScope, Phased,
    Resource, StigmerError, StigmerResult, Workflow, WorkflowInstance,
};
use stigmer_engine::{EngineError, StartWorkflowOptions, MEMO_RUNNER_QUEUE};
use stigmer_store::ResourceStore;

use crate::clients::ResourceClient;
use crate::engine_cell::EngineCell;
use crate::orchestrator::EXECUTION_ORCHESTRATION;
use crate::pipeline::{RequestContext, Step};
use crate::subscribe::SubscribeHub;
use crate::transport::ClientSlot;

/// Audit principal recorded on writes; the local core has exactly one
const LOCAL_ACTOR: &str = "local";

/// Lookup by id when present, by slug otherwise
fn lookup<R: Resource>(store: &ResourceStore, candidate: &R) -> StigmerResult<Option<R>> {
    let meta = candidate.metadata();
    if !meta.id.is_empty() {
        match store.get::<R>(&meta.id) {
            Ok(found) => return Ok(Some(found)),
            Err(stigmer_store::StoreError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(store.find_by_slug(meta.owner_scope, &meta.org, &meta.slug)?)
}

// ============================================================================
// ValidateProto
// ============================================================================

/// Structural and field-constraint validation of the input
pub struct ValidateProto;

#[async_trait]
impl<R: Resource> Step<R> for ValidateProto {
    fn name(&self) -> &'static str {
        "ValidateProto"
    }

    async fn execute(&self, ctx: &mut RequestContext<R>) -> StigmerResult<()> {
        ctx.input.validate_spec().map_err(StigmerError::invalid)
    }
}

// ============================================================================
// ResolveSlug
// ============================================================================

/// Derive the slug from `metadata.name`. Must run before any step that
/// indexes by slug.
pub struct ResolveSlug;

#[async_trait]
impl<R: Resource> Step<R> for ResolveSlug {
    fn name(&self) -> &'static str {
        "ResolveSlug"
    }

    async fn execute(&self, ctx: &mut RequestContext<R>) -> StigmerResult<()> {
        let slug = normalize_slug(&ctx.input.metadata().name);
        if slug.is_empty() {
            return Err(StigmerError::invalid(format!(
                "name {:?} normalizes to an empty slug",
                ctx.input.metadata().name
            )));
        }
        ctx.input.metadata_mut().slug = slug;
        Ok(())
    }
}

// ============================================================================
// LoadParent
// ============================================================================

/// The loaded parent, readable by later steps through the extension slots
pub struct ParentResource<P>(pub P);

/// Fetch the child's parent and attach it to the context; NotFound when the
/// reference dangles. The extractor returns the parent id (or slug).
pub struct LoadParent<R: Resource, P: Resource> {
    store: ResourceStore,
    extract: fn(&R) -> String,
    _marker: PhantomData<fn() -> (R, P)>,
}

impl<R: Resource, P: Resource> LoadParent<R, P> {
    pub fn new(store: ResourceStore, extract: fn(&R) -> String) -> Self {
        Self {
            store,
            extract,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<R: Resource, P: Resource> Step<R> for LoadParent<R, P> {
    fn name(&self) -> &'static str {
        "LoadParent"
    }

    async fn execute(&self, ctx: &mut RequestContext<R>) -> StigmerResult<()> {
        let reference = (self.extract)(&ctx.input);
        if reference.is_empty() {
            return Err(StigmerError::invalid(format!(
                "{} is missing its {} reference",
                R::KIND,
                P::KIND
            )));
        }

        let parent = match self.store.get::<P>(&reference) {
            Ok(parent) => parent,
            Err(stigmer_store::StoreError::NotFound { .. }) => {
                let meta = ctx.input.metadata();
                self.store
                    .find_by_slug::<P>(meta.owner_scope, &meta.org, &reference)?
                    .ok_or_else(|| StigmerError::not_found(P::KIND.as_str(), reference.clone()))?
            }
            Err(e) => return Err(e.into()),
        };

        ctx.insert_ext(ParentResource(parent));
        Ok(())
    }
}

// ============================================================================
// ValidateSameOrgBusinessRule
// ============================================================================

/// When parent and child are both organization-scoped their orgs must
/// match. Platform- and user-scoped parents are exempt.
pub struct ValidateSameOrgRule<R: Resource, P: Resource> {
    _marker: PhantomData<fn() -> (R, P)>,
}

impl<R: Resource, P: Resource> Default for ValidateSameOrgRule<R, P> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<R: Resource, P: Resource> Step<R> for ValidateSameOrgRule<R, P> {
    fn name(&self) -> &'static str {
        "ValidateSameOrgBusinessRule"
    }

    async fn execute(&self, ctx: &mut RequestContext<R>) -> StigmerResult<()> {
        let parent = ctx
            .get_ext::<ParentResource<P>>()
            .ok_or_else(|| StigmerError::internal("same-org check ran before LoadParent"))?;

        let child_meta = ctx.input.metadata();
        let parent_meta = parent.0.metadata();
        if child_meta.owner_scope == OwnerScope::Organization
            && parent_meta.owner_scope == OwnerScope::Organization
            && child_meta.org != parent_meta.org
        {
            return Err(StigmerError::invalid(format!(
                "organization mismatch: {} belongs to org {:?} but its {} belongs to org {:?}",
                R::KIND,
                child_meta.org,
                P::KIND,
                parent_meta.org
            )));
        }
        Ok(())
    }
}

// ============================================================================
// CheckDuplicate
// ============================================================================

/// Scan the slug namespace and fail AlreadyExists when another resource
/// holds it
pub struct CheckDuplicate {
    store: ResourceStore,
}

impl CheckDuplicate {
    pub fn new(store: ResourceStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<R: Resource> Step<R> for CheckDuplicate {
    fn name(&self) -> &'static str {
        "CheckDuplicate"
    }

    async fn execute(&self, ctx: &mut RequestContext<R>) -> StigmerResult<()> {
        let meta = ctx.input.metadata();
        if let Some(holder) =
            self.store
                .find_by_slug::<R>(meta.owner_scope, &meta.org, &meta.slug)?
        {
            if holder.metadata().id != meta.id || meta.id.is_empty() {
                return Err(StigmerError::already_exists(
                    R::KIND.as_str(),
                    meta.slug.clone(),
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// LoadExisting
// ============================================================================

/// For Update/Delete: fetch by id or slug; NotFound when absent
pub struct LoadExisting {
    store: ResourceStore,
}

impl LoadExisting {
    pub fn new(store: ResourceStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<R: Resource> Step<R> for LoadExisting {
    fn name(&self) -> &'static str {
        "LoadExisting"
    }

    async fn execute(&self, ctx: &mut RequestContext<R>) -> StigmerResult<()> {
        let existing = lookup(&self.store, &ctx.input)?.ok_or_else(|| {
            let meta = ctx.input.metadata();
            let what = if meta.id.is_empty() {
                meta.slug.clone()
            } else {
                meta.id.clone()
            };
            StigmerError::not_found(R::KIND.as_str(), what)
        })?;
        ctx.input.metadata_mut().id = existing.metadata().id.clone();
        ctx.existing = Some(existing);
        ctx.should_create = false;
        Ok(())
    }
}

// ============================================================================
// LoadForApply
// ============================================================================

/// For Apply: look up by slug. Found sets the update branch and copies the
/// existing id into the input; absent sets the create branch. Never fails
/// on NotFound: that is a valid apply path.
pub struct LoadForApply {
    store: ResourceStore,
}

impl LoadForApply {
    pub fn new(store: ResourceStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<R: Resource> Step<R> for LoadForApply {
    fn name(&self) -> &'static str {
        "LoadForApply"
    }

    async fn execute(&self, ctx: &mut RequestContext<R>) -> StigmerResult<()> {
        let meta = ctx.input.metadata();
        match self
            .store
            .find_by_slug::<R>(meta.owner_scope, &meta.org, &meta.slug)?
        {
            Some(existing) => {
                ctx.input.metadata_mut().id = existing.metadata().id.clone();
                ctx.existing = Some(existing);
                ctx.should_create = false;
            }
            None => {
                ctx.should_create = true;
            }
        }
        Ok(())
    }
}

// ============================================================================
// BuildNewState
// ============================================================================

/// Assign id, timestamps and audit fields; merge spec updates onto the
/// loaded record for the update branch.
pub struct BuildNewState;

#[async_trait]
impl<R: Resource> Step<R> for BuildNewState {
    fn name(&self) -> &'static str {
        "BuildNewState"
    }

    async fn execute(&self, ctx: &mut RequestContext<R>) -> StigmerResult<()> {
        let now = chrono::Utc::now();
        let new_state = match &ctx.existing {
            Some(existing) => {
                let mut updated = existing.clone();
                updated.merge_spec_from(&ctx.input);
                let meta = updated.metadata_mut();
                meta.labels = ctx.input.metadata().labels.clone();
                // updated_at advances even when no spec field changed;
                // idempotence is judged on spec and status.
                meta.updated_at = Some(now);
                meta.updated_by = LOCAL_ACTOR.to_string();
                updated
            }
            None => {
                let mut created = ctx.input.clone();
                let meta = created.metadata_mut();
                if meta.id.is_empty() {
                    meta.id = generate_id(R::KIND.id_prefix());
                }
                meta.created_at = Some(now);
                meta.updated_at = Some(now);
                meta.created_by = LOCAL_ACTOR.to_string();
                meta.updated_by = LOCAL_ACTOR.to_string();
                created
            }
        };
        ctx.new_state = Some(new_state);
        Ok(())
    }
}

// ============================================================================
// SetInitialPhase
// ============================================================================

/// Executions enter the store as PENDING, whatever the caller sent
pub struct SetInitialPhase;

#[async_trait]
impl<R: Resource + Phased> Step<R> for SetInitialPhase {
    fn name(&self) -> &'static str {
        "SetInitialPhase"
    }

    async fn execute(&self, ctx: &mut RequestContext<R>) -> StigmerResult<()> {
        ctx.effective_mut().reset();
        Ok(())
    }
}

// ============================================================================
// Persist
// ============================================================================

/// Write the new state through the store
pub struct Persist {
    store: ResourceStore,
}

impl Persist {
    pub fn new(store: ResourceStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<R: Resource> Step<R> for Persist {
    fn name(&self) -> &'static str {
        "Persist"
    }

    async fn execute(&self, ctx: &mut RequestContext<R>) -> StigmerResult<()> {
        self.store.save(ctx.effective())?;
        Ok(())
    }
}

/// Persist for executions. Same step name, same write, plus a declared
/// compensator: when a later step fails (StartWorkflow on engine errors),
/// the just-persisted record flips to FAILED and subscribers see the
/// terminal snapshot.
pub struct PersistWithCompensation {
    store: ResourceStore,
    hub: SubscribeHub,
}

impl PersistWithCompensation {
    pub fn new(store: ResourceStore, hub: SubscribeHub) -> Self {
        Self { store, hub }
    }
}

#[async_trait]
impl<R: Resource + Phased> Step<R> for PersistWithCompensation {
    fn name(&self) -> &'static str {
        "Persist"
    }

    async fn execute(&self, ctx: &mut RequestContext<R>) -> StigmerResult<()> {
        self.store.save(ctx.effective())?;

        let store = self.store.clone();
        let hub = self.hub.clone();
        let snapshot = ctx.effective().clone();
        ctx.push_compensation(Box::new(move || {
            let mut failed = snapshot;
            failed.transition(ExecutionPhase::Failed);
            failed.set_status_message("workflow engine rejected the start request");
            let id = failed.metadata().id.clone();
            if let Err(e) = store.save(&failed) {
                warn!(%id, error = %e, "failed to compensate persisted execution");
                return;
            }
            if let Ok(value) = serde_json::to_value(&failed) {
                hub.publish(&id, value);
            }
        }));
        Ok(())
    }
}

// ============================================================================
// CreateDefaultChildIfNeeded
// ============================================================================

/// Resilient creation of a parent's default child instance.
///
/// The parent's status pointer is only a cache; the child's canonical
/// locator is the `{parent-slug}-default` slug. A crash between persisting
/// the child and writing the pointer leaves an orphan, so the sequence is:
/// use the pointer when it dereferences, repair it from the slug when it
/// does not, and only create a child when neither exists.
pub struct EnsureDefaultInstance<P: Resource, C: Resource> {
    store: ResourceStore,
    client: Arc<ClientSlot<ResourceClient<C>>>,
    pointer: fn(&P) -> &str,
    set_pointer: fn(&mut P, String),
    build_child: fn(&P) -> C,
}

impl<P: Resource, C: Resource> EnsureDefaultInstance<P, C> {
    pub fn new(
        store: ResourceStore,
        client: Arc<ClientSlot<ResourceClient<C>>>,
        pointer: fn(&P) -> &str,
        set_pointer: fn(&mut P, String),
        build_child: fn(&P) -> C,
    ) -> Self {
        Self {
            store,
            client,
            pointer,
            set_pointer,
            build_child,
        }
    }
}

#[async_trait]
impl<P: Resource, C: Resource> Step<P> for EnsureDefaultInstance<P, C> {
    fn name(&self) -> &'static str {
        "CreateDefaultChildIfNeeded"
    }

    async fn execute(&self, ctx: &mut RequestContext<P>) -> StigmerResult<()> {
        let parent = ctx.effective().clone();

        let pointer = (self.pointer)(&parent);
        if !pointer.is_empty() && self.store.get::<C>(pointer).is_ok() {
            return Ok(());
        }

        let meta = parent.metadata();
        let slug = default_instance_slug(&meta.slug);
        if let Some(orphan) = self
            .store
            .find_by_slug::<C>(meta.owner_scope, &meta.org, &slug)?
        {
            // The child exists but the parent lost its pointer: repair.
            let mut repaired = parent.clone();
            (self.set_pointer)(&mut repaired, orphan.metadata().id.clone());
            self.store.save(&repaired)?;
            ctx.new_state = Some(repaired);
            debug!(parent = %meta.slug, child = %orphan.metadata().id, "default instance pointer repaired");
            return Ok(());
        }

        let Some(client) = self.client.get() else {
            // Sibling client not yet injected: the parent stays usable and
            // the next run repairs through the slug path.
            warn!(parent = %meta.slug, "instance service not wired; default instance deferred");
            return Ok(());
        };

        let child = (self.build_child)(&parent);
        let created = client.create(&child).await?;
        let mut updated = parent.clone();
        (self.set_pointer)(&mut updated, created.metadata().id.clone());
        self.store.save(&updated)?;
        ctx.new_state = Some(updated);
        Ok(())
    }
}

// ============================================================================
// ResolveExecutionInstance
// ============================================================================

/// For `run` without an explicit instance: resolve the workflow's default
/// instance with the same recovery sequence, then rewrite the execution's
/// instance reference.
pub struct ResolveExecutionInstance {
    store: ResourceStore,
    client: Arc<ClientSlot<ResourceClient<WorkflowInstance>>>,
}

impl ResolveExecutionInstance {
    pub fn new(
        store: ResourceStore,
        client: Arc<ClientSlot<ResourceClient<WorkflowInstance>>>,
    ) -> Self {
        Self { store, client }
    }
}

#[async_trait]
impl Step<stigmer_core::WorkflowExecution> for ResolveExecutionInstance {
    fn name(&self) -> &'static str {
        "CreateDefaultChildIfNeeded"
    }

    async fn execute(
        &self,
        ctx: &mut RequestContext<stigmer_core::WorkflowExecution>,
    ) -> StigmerResult<()> {
        if !ctx.input.spec.instance_id.is_empty() {
            return Ok(());
        }

        let reference = ctx.input.spec.workflow_id.clone();
        let workflow = match self.store.get::<Workflow>(&reference) {
            Ok(wf) => wf,
            Err(stigmer_store::StoreError::NotFound { .. }) => {
                let meta = ctx.input.metadata();
                self.store
                    .find_by_slug::<Workflow>(meta.owner_scope, &meta.org, &reference)?
                    .ok_or_else(|| StigmerError::not_found("workflow", reference.clone()))?
            }
            Err(e) => return Err(e.into()),
        };

        let wf_meta = workflow.metadata();

        // 1. the pointer, when it still dereferences
        let pointer = workflow.status.default_instance_id.clone();
        if !pointer.is_empty() && self.store.get::<WorkflowInstance>(&pointer).is_ok() {
            ctx.input.spec.workflow_id = wf_meta.id.clone();
            ctx.input.spec.instance_id = pointer;
            return Ok(());
        }

        // 2./3. the canonical slug, repairing the pointer on a hit
        let slug = default_instance_slug(&wf_meta.slug);
        if let Some(instance) = self
            .store
            .find_by_slug::<WorkflowInstance>(wf_meta.owner_scope, &wf_meta.org, &slug)?
        {
            let mut repaired = workflow.clone();
            repaired.status.default_instance_id = instance.metadata().id.clone();
            self.store.save(&repaired)?;
            debug!(workflow = %wf_meta.slug, "default instance recovered from slug");
            ctx.input.spec.workflow_id = wf_meta.id.clone();
            ctx.input.spec.instance_id = instance.metadata().id.clone();
            return Ok(());
        }

        // 4. nothing exists: create the default instance now
        let client = self.client.get().ok_or_else(|| {
            StigmerError::unavailable("workflow instance service not wired; cannot resolve default instance")
        })?;

        let mut instance = WorkflowInstance {
            metadata: stigmer_core::Metadata::named(slug),
            spec: stigmer_core::WorkflowInstanceSpec {
                workflow_id: wf_meta.id.clone(),
                ..Default::default()
            },
            status: Default::default(),
        };
        instance.metadata.owner_scope = wf_meta.owner_scope;
        instance.metadata.org = wf_meta.org.clone();
        let created = client.create(&instance).await?;

        let mut repaired = workflow.clone();
        repaired.status.default_instance_id = created.metadata().id.clone();
        self.store.save(&repaired)?;

        ctx.input.spec.workflow_id = wf_meta.id.clone();
        ctx.input.spec.instance_id = created.metadata().id.clone();
        Ok(())
    }
}

// ============================================================================
// StartWorkflow
// ============================================================================

/// Hand the persisted execution to the engine. Engine absent or
/// unreachable: the execution stays PENDING with a warning (queries and
/// CRUD keep working). Engine reachable but rejecting: the pipeline fails
/// and Persist's compensator flips the record to FAILED.
pub struct StartWorkflow {
    cell: EngineCell,
    orchestrator_queue: String,
    runner_queue: String,
}

impl StartWorkflow {
    pub fn new(cell: EngineCell, orchestrator_queue: String, runner_queue: String) -> Self {
        Self {
            cell,
            orchestrator_queue,
            runner_queue,
        }
    }
}

#[async_trait]
impl Step<stigmer_core::WorkflowExecution> for StartWorkflow {
    fn name(&self) -> &'static str {
        "StartWorkflow"
    }

    async fn execute(
        &self,
        ctx: &mut RequestContext<stigmer_core::WorkflowExecution>,
    ) -> StigmerResult<()> {
        let execution_id = ctx.effective().metadata().id.clone();

        let Some(engine) = self.cell.get() else {
            warn!(execution = %execution_id, "workflow engine not connected; execution stays PENDING");
            return Ok(());
        };

        let opts = StartWorkflowOptions::new(
            execution_id.clone(),
            EXECUTION_ORCHESTRATION,
            self.orchestrator_queue.clone(),
        )
        .with_input(json!({ "execution_id": execution_id }))
        .with_memo(MEMO_RUNNER_QUEUE, self.runner_queue.clone());

        match engine.start_workflow(opts).await {
            Ok(run_id) => {
                debug!(execution = %execution_id, run = %run_id, "orchestration started");
                Ok(())
            }
            Err(EngineError::Unavailable(cause)) => {
                warn!(execution = %execution_id, %cause, "engine unreachable; execution stays PENDING");
                Ok(())
            }
            Err(e) => Err(StigmerError::internal(format!(
                "engine rejected workflow start: {e}"
            ))),
        }
    }
}

// ============================================================================
// DeleteExisting
// ============================================================================

/// Remove the record loaded by LoadExisting
pub struct DeleteExisting {
    store: ResourceStore,
}

impl DeleteExisting {
    pub fn new(store: ResourceStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<R: Resource> Step<R> for DeleteExisting {
    fn name(&self) -> &'static str {
        "Delete"
    }

    async fn execute(&self, ctx: &mut RequestContext<R>) -> StigmerResult<()> {
        let existing = ctx
            .existing
            .as_ref()
            .ok_or_else(|| StigmerError::internal("delete ran before LoadExisting"))?;
        self.store.delete(R::KIND, &existing.metadata().id)?;
        Ok(())
    }
}
