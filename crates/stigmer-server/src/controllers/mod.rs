//! Resource controllers
//!
//! One command service and one query service per kind, registered as
//! distinct endpoints even in-process. Controllers hold no mutable state
//! beyond injected dependencies; every operation is a pipeline run or a
//! store scan.

pub mod agent;
pub mod execution;
pub mod signal;
pub mod skill;
pub mod workflow;

#[cfg(test)]
mod order_tests;

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Instant;

use stigmer_core::{OwnerScope, Resource, ResourceKind, StigmerError, StigmerResult};
use stigmer_store::ResourceStore;

use crate::clients::{command_service, query_service};
use crate::pipeline::{Pipeline, RequestContext};
use crate::subscribe::{snapshot_phase, SubscribeHub};
use crate::transport::{Handler, Request, Response};

/// The pipelines a command controller runs
pub struct Pipelines<R: Resource> {
    pub create: Pipeline<R>,
    pub update: Pipeline<R>,
    pub delete: Pipeline<R>,
    /// Apply prelude: decide create-vs-update, then delegate
    pub apply: Pipeline<R>,
}

/// Methods beyond Create/Update/Delete/Apply (artifact push, status
/// updates); `Ok(None)` means the method is not handled here.
#[async_trait]
pub trait CommandExtension<R: Resource>: Send + Sync {
    async fn handle(&self, method: &str, body: Value) -> StigmerResult<Option<Response>>;
}

/// Generic command controller
pub struct CommandHandler<R: Resource> {
    service: &'static str,
    store: ResourceStore,
    pipelines: Pipelines<R>,
    post_create: Option<Box<dyn Fn(&R) + Send + Sync>>,
    extension: Option<Box<dyn CommandExtension<R>>>,
}

impl<R: Resource> CommandHandler<R> {
    pub fn new(store: ResourceStore, pipelines: Pipelines<R>) -> Self {
        Self {
            service: command_service(R::KIND),
            store,
            pipelines,
            post_create: None,
            extension: None,
        }
    }

    pub fn with_post_create(mut self, hook: impl Fn(&R) + Send + Sync + 'static) -> Self {
        self.post_create = Some(Box::new(hook));
        self
    }

    pub fn with_extension(mut self, extension: impl CommandExtension<R> + 'static) -> Self {
        self.extension = Some(Box::new(extension));
        self
    }

    fn decode_input(body: Value) -> StigmerResult<R> {
        serde_json::from_value(body)
            .map_err(|e| StigmerError::invalid(format!("malformed {}: {e}", R::KIND)))
    }

    fn encode(resource: &R) -> StigmerResult<Value> {
        serde_json::to_value(resource).map_err(|e| StigmerError::internal(e.to_string()))
    }

    async fn create(&self, body: Value, deadline: Instant) -> StigmerResult<Value> {
        let mut ctx = RequestContext::with_deadline(Self::decode_input(body)?, deadline);
        self.pipelines.create.run(&mut ctx).await?;
        let created = ctx.effective();
        if let Some(hook) = &self.post_create {
            hook(created);
        }
        Self::encode(created)
    }

    async fn update(&self, body: Value, deadline: Instant) -> StigmerResult<Value> {
        let mut ctx = RequestContext::with_deadline(Self::decode_input(body)?, deadline);
        self.pipelines.update.run(&mut ctx).await?;
        Self::encode(ctx.effective())
    }

    /// Apply delegates: prelude decides the branch, then the standard
    /// create or update pipeline runs on the same context.
    async fn apply(&self, body: Value, deadline: Instant) -> StigmerResult<Value> {
        let mut ctx = RequestContext::with_deadline(Self::decode_input(body)?, deadline);
        self.pipelines.apply.run(&mut ctx).await?;
        if ctx.should_create {
            self.pipelines.create.run(&mut ctx).await?;
            if let Some(hook) = &self.post_create {
                hook(ctx.effective());
            }
        } else {
            self.pipelines.update.run(&mut ctx).await?;
        }
        Self::encode(ctx.effective())
    }

    async fn delete(&self, body: Value, deadline: Instant) -> StigmerResult<Value> {
        let reference = RefBody::parse(&body)?;
        let existing = reference.resolve::<R>(&self.store)?;
        let mut ctx = RequestContext::with_deadline(existing, deadline);
        self.pipelines.delete.run(&mut ctx).await?;
        Ok(json!({}))
    }
}

#[async_trait]
impl<R: Resource> Handler for CommandHandler<R> {
    fn service_name(&self) -> &'static str {
        self.service
    }

    fn resource_kind(&self) -> Option<ResourceKind> {
        Some(R::KIND)
    }

    async fn handle(&self, req: Request) -> StigmerResult<Response> {
        if let Some(extension) = &self.extension {
            if let Some(response) = extension.handle(&req.method, req.body.clone()).await? {
                return Ok(response);
            }
        }
        let value = match req.method.as_str() {
            "Create" => self.create(req.body, req.deadline).await?,
            "Update" => self.update(req.body, req.deadline).await?,
            "Apply" => self.apply(req.body, req.deadline).await?,
            "Delete" => self.delete(req.body, req.deadline).await?,
            other => {
                return Err(StigmerError::invalid(format!(
                    "{} has no method {other}",
                    self.service
                )))
            }
        };
        Ok(Response::Unary(value))
    }
}

/// Reference body `{id}` or `{scope, org, slug}` used by Delete and queries
struct RefBody {
    id: Option<String>,
    scope: OwnerScope,
    org: String,
    slug: String,
}

impl RefBody {
    fn parse(body: &Value) -> StigmerResult<Self> {
        let id = body.get("id").and_then(Value::as_str).map(str::to_string);
        let scope = body
            .get("scope")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| StigmerError::invalid(format!("bad scope: {e}")))?
            .unwrap_or_default();
        let org = body
            .get("org")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let slug = body
            .get("slug")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if id.is_none() && slug.is_empty() {
            return Err(StigmerError::invalid("reference needs an id or a slug"));
        }
        Ok(Self {
            id,
            scope,
            org,
            slug,
        })
    }

    fn resolve<R: Resource>(&self, store: &ResourceStore) -> StigmerResult<R> {
        if let Some(id) = &self.id {
            return Ok(store.get::<R>(id)?);
        }
        store
            .find_by_slug::<R>(self.scope, &self.org, &self.slug)?
            .ok_or_else(|| StigmerError::not_found(R::KIND.as_str(), self.slug.clone()))
    }
}

/// Generic query controller: Get, GetBySlug, List, GetByParent,
/// GetByReference, and Subscribe for execution kinds.
pub struct QueryHandler<R: Resource> {
    service: &'static str,
    store: ResourceStore,
    /// Extracts the owning parent id for GetByParent
    parent_extract: Option<fn(&R) -> Option<String>>,
    /// Resolves a version tag to a digest (Skill only)
    reference_resolver: Option<fn(&R, Option<&str>) -> StigmerResult<String>>,
    /// Present on execution kinds: enables Subscribe
    hub: Option<SubscribeHub>,
}

impl<R: Resource> QueryHandler<R> {
    pub fn new(store: ResourceStore) -> Self {
        Self {
            service: query_service(R::KIND),
            store,
            parent_extract: None,
            reference_resolver: None,
            hub: None,
        }
    }

    pub fn with_parent(mut self, extract: fn(&R) -> Option<String>) -> Self {
        self.parent_extract = Some(extract);
        self
    }

    pub fn with_reference_resolver(
        mut self,
        resolver: fn(&R, Option<&str>) -> StigmerResult<String>,
    ) -> Self {
        self.reference_resolver = Some(resolver);
        self
    }

    pub fn with_subscribe(mut self, hub: SubscribeHub) -> Self {
        self.hub = Some(hub);
        self
    }

    fn encode(resource: &R) -> StigmerResult<Value> {
        serde_json::to_value(resource).map_err(|e| StigmerError::internal(e.to_string()))
    }

    fn get_by_reference(&self, body: Value) -> StigmerResult<Value> {
        let reference: stigmer_core::ResourceRef = serde_json::from_value(body)
            .map_err(|e| StigmerError::invalid(format!("bad reference: {e}")))?;
        let resource = self
            .store
            .find_by_name::<R>(reference.scope, &reference.org, &reference.name)?
            .ok_or_else(|| {
                StigmerError::not_found(R::KIND.as_str(), reference.name.clone())
            })?;

        let mut out = json!({ "resource": Self::encode(&resource)? });
        if let Some(resolver) = self.reference_resolver {
            let digest = resolver(&resource, reference.version_tag.as_deref())?;
            out["resolved_digest"] = json!(digest);
        }
        Ok(out)
    }

    /// Replay the current record, then forward every status change in
    /// publish order; close after a terminal phase.
    async fn subscribe(&self, body: Value) -> StigmerResult<Response> {
        let hub = self
            .hub
            .clone()
            .ok_or_else(|| StigmerError::invalid(format!("{} is not subscribable", R::KIND)))?;
        let id = body
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| StigmerError::invalid("subscribe needs an id"))?
            .to_string();

        // Attach before reading the snapshot so no change between the two
        // can be missed; a duplicate of the snapshot is harmless.
        let mut updates = hub.subscribe(&id);
        let current = self.store.get::<R>(&id)?;
        let snapshot = Self::encode(&current)?;
        let already_terminal = snapshot_phase(&snapshot)
            .map(|p| p.is_terminal())
            .unwrap_or(false);

        let (tx, rx) = tokio::sync::mpsc::channel(16);
        tokio::spawn(async move {
            if tx.send(snapshot).await.is_err() {
                return;
            }
            if already_terminal {
                return;
            }
            loop {
                match updates.recv().await {
                    Ok(value) => {
                        let terminal = snapshot_phase(&value)
                            .map(|p| p.is_terminal())
                            .unwrap_or(false);
                        if tx.send(value).await.is_err() {
                            return;
                        }
                        if terminal {
                            return;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(%id, missed, "subscribe stream lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        });
        Ok(Response::Stream(rx))
    }
}

#[async_trait]
impl<R: Resource> Handler for QueryHandler<R> {
    fn service_name(&self) -> &'static str {
        self.service
    }

    fn resource_kind(&self) -> Option<ResourceKind> {
        Some(R::KIND)
    }

    async fn handle(&self, req: Request) -> StigmerResult<Response> {
        let value = match req.method.as_str() {
            "Get" => {
                let id = req
                    .body
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| StigmerError::invalid("get needs an id"))?;
                Self::encode(&self.store.get::<R>(id)?)?
            }
            "GetBySlug" => {
                let reference = RefBody::parse(&req.body)?;
                Self::encode(&reference.resolve::<R>(&self.store)?)?
            }
            "List" => {
                let items = self
                    .store
                    .list::<R>()?
                    .iter()
                    .map(Self::encode)
                    .collect::<StigmerResult<Vec<_>>>()?;
                json!({ "items": items })
            }
            "GetByParent" => {
                let extract = self.parent_extract.ok_or_else(|| {
                    StigmerError::invalid(format!("{} has no parent index", R::KIND))
                })?;
                let parent_id = req
                    .body
                    .get("parent_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| StigmerError::invalid("get-by-parent needs a parent_id"))?;
                let items = self
                    .store
                    .list::<R>()?
                    .iter()
                    .filter(|r| extract(r).as_deref() == Some(parent_id))
                    .map(Self::encode)
                    .collect::<StigmerResult<Vec<_>>>()?;
                json!({ "items": items })
            }
            "GetByReference" => self.get_by_reference(req.body)?,
            "Subscribe" => return self.subscribe(req.body).await,
            other => {
                return Err(StigmerError::invalid(format!(
                    "{} has no method {other}",
                    self.service
                )))
            }
        };
        Ok(Response::Unary(value))
    }
}
