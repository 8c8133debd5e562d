//! Typed in-process clients
//!
//! Thin wrappers over the channel, shaped like generated service stubs:
//! they serialize through the same envelope a remote caller would use, so
//! controller-to-controller calls get the full interceptor chain.

use serde_json::{json, Value};
use std::marker::PhantomData;
use tokio::sync::mpsc;

use stigmer_core::{
    ExecutionPhase, OwnerScope, Resource, ResourceKind, ResourceRef, StigmerError, StigmerResult,
    TaskProgress,
};

use crate::transport::Channel;

pub fn command_service(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Skill => "stigmer.v1.SkillCommands",
        ResourceKind::Agent => "stigmer.v1.AgentCommands",
        ResourceKind::AgentInstance => "stigmer.v1.AgentInstanceCommands",
        ResourceKind::AgentExecution => "stigmer.v1.AgentExecutionCommands",
        ResourceKind::Workflow => "stigmer.v1.WorkflowCommands",
        ResourceKind::WorkflowInstance => "stigmer.v1.WorkflowInstanceCommands",
        ResourceKind::WorkflowExecution => "stigmer.v1.WorkflowExecutionCommands",
        ResourceKind::Signal => "stigmer.v1.SignalCommands",
    }
}

pub fn query_service(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Skill => "stigmer.v1.SkillQueries",
        ResourceKind::Agent => "stigmer.v1.AgentQueries",
        ResourceKind::AgentInstance => "stigmer.v1.AgentInstanceQueries",
        ResourceKind::AgentExecution => "stigmer.v1.AgentExecutionQueries",
        ResourceKind::Workflow => "stigmer.v1.WorkflowQueries",
        ResourceKind::WorkflowInstance => "stigmer.v1.WorkflowInstanceQueries",
        ResourceKind::WorkflowExecution => "stigmer.v1.WorkflowExecutionQueries",
        ResourceKind::Signal => "stigmer.v1.SignalQueries",
    }
}

/// Client for one resource kind's command and query services
pub struct ResourceClient<R: Resource> {
    channel: Channel,
    _marker: PhantomData<fn() -> R>,
}

impl<R: Resource> Clone for ResourceClient<R> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
            _marker: PhantomData,
        }
    }
}

impl<R: Resource> ResourceClient<R> {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            _marker: PhantomData,
        }
    }

    fn commands(&self) -> &'static str {
        command_service(R::KIND)
    }

    fn queries(&self) -> &'static str {
        query_service(R::KIND)
    }

    fn decode(value: Value) -> StigmerResult<R> {
        serde_json::from_value(value)
            .map_err(|e| StigmerError::internal(format!("undecodable {}: {e}", R::KIND)))
    }

    pub async fn create(&self, resource: &R) -> StigmerResult<R> {
        let body = serde_json::to_value(resource)
            .map_err(|e| StigmerError::internal(e.to_string()))?;
        Self::decode(self.channel.unary(self.commands(), "Create", body).await?)
    }

    pub async fn update(&self, resource: &R) -> StigmerResult<R> {
        let body = serde_json::to_value(resource)
            .map_err(|e| StigmerError::internal(e.to_string()))?;
        Self::decode(self.channel.unary(self.commands(), "Update", body).await?)
    }

    /// Create-or-update by slug
    pub async fn apply(&self, resource: &R) -> StigmerResult<R> {
        let body = serde_json::to_value(resource)
            .map_err(|e| StigmerError::internal(e.to_string()))?;
        Self::decode(self.channel.unary(self.commands(), "Apply", body).await?)
    }

    pub async fn delete(&self, id: &str) -> StigmerResult<()> {
        self.channel
            .unary(self.commands(), "Delete", json!({ "id": id }))
            .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> StigmerResult<R> {
        Self::decode(
            self.channel
                .unary(self.queries(), "Get", json!({ "id": id }))
                .await?,
        )
    }

    pub async fn get_by_slug(&self, scope: OwnerScope, org: &str, slug: &str) -> StigmerResult<R> {
        Self::decode(
            self.channel
                .unary(
                    self.queries(),
                    "GetBySlug",
                    json!({ "scope": scope, "org": org, "slug": slug }),
                )
                .await?,
        )
    }

    pub async fn list(&self) -> StigmerResult<Vec<R>> {
        let value = self.channel.unary(self.queries(), "List", json!({})).await?;
        let items = value
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        items.into_iter().map(Self::decode).collect()
    }

    pub async fn get_by_parent(&self, parent_id: &str) -> StigmerResult<Vec<R>> {
        let value = self
            .channel
            .unary(self.queries(), "GetByParent", json!({ "parent_id": parent_id }))
            .await?;
        let items = value
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        items.into_iter().map(Self::decode).collect()
    }

    /// Canonical typed lookup. For Skills the response also carries the
    /// digest the version tag resolved to.
    pub async fn get_by_reference(&self, reference: &ResourceRef) -> StigmerResult<(R, Option<String>)> {
        let value = self
            .channel
            .unary(
                self.queries(),
                "GetByReference",
                serde_json::to_value(reference).map_err(|e| StigmerError::internal(e.to_string()))?,
            )
            .await?;
        let resolved = value
            .get("resolved_digest")
            .and_then(Value::as_str)
            .map(str::to_string);
        let resource = value
            .get("resource")
            .cloned()
            .ok_or_else(|| StigmerError::internal("reference response missing resource"))?;
        Ok((Self::decode(resource)?, resolved))
    }

    /// Apply a status update to an execution. Ordered: the controller writes
    /// to the store and republishes before the call returns.
    pub async fn update_status(
        &self,
        id: &str,
        phase: ExecutionPhase,
        message: Option<&str>,
        task: Option<&TaskProgress>,
    ) -> StigmerResult<R> {
        let mut body = json!({ "id": id, "phase": phase });
        if let Some(message) = message {
            body["message"] = json!(message);
        }
        if let Some(task) = task {
            body["task"] = serde_json::to_value(task)
                .map_err(|e| StigmerError::internal(e.to_string()))?;
        }
        Self::decode(self.channel.unary(self.commands(), "UpdateStatus", body).await?)
    }

    pub async fn cancel(&self, id: &str) -> StigmerResult<R> {
        Self::decode(
            self.channel
                .unary(self.commands(), "Cancel", json!({ "id": id }))
                .await?,
        )
    }

    /// Stream the resource on every status change until a terminal phase,
    /// then the stream closes.
    pub async fn subscribe(&self, id: &str) -> StigmerResult<mpsc::Receiver<R>> {
        let mut raw = self
            .channel
            .stream(self.queries(), "Subscribe", json!({ "id": id }))
            .await?;
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            while let Some(value) = raw.recv().await {
                match serde_json::from_value::<R>(value) {
                    Ok(resource) => {
                        if tx.send(resource).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping undecodable subscribe frame");
                    }
                }
            }
        });
        Ok(rx)
    }
}

/// Artifact push/pull client for the Skill command service
#[derive(Clone)]
pub struct SkillArtifactClient {
    channel: Channel,
}

/// Result of a push: the content digest and the tag that now points at it
#[derive(Debug, Clone)]
pub struct PushedArtifact {
    pub digest: String,
    pub tag: String,
}

impl SkillArtifactClient {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    pub async fn push(
        &self,
        name: &str,
        scope: OwnerScope,
        org: &str,
        artifact: &[u8],
        tag: Option<&str>,
    ) -> StigmerResult<PushedArtifact> {
        use base64::Engine as _;
        let mut body = json!({
            "name": name,
            "scope": scope,
            "org": org,
            "artifact": base64::engine::general_purpose::STANDARD.encode(artifact),
        });
        if let Some(tag) = tag {
            body["tag"] = json!(tag);
        }
        let value = self
            .channel
            .unary(command_service(ResourceKind::Skill), "Push", body)
            .await?;
        Ok(PushedArtifact {
            digest: value
                .get("digest")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            tag: value
                .get("tag")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }

    pub async fn pull(&self, name: &str, tag: Option<&str>) -> StigmerResult<(String, Vec<u8>)> {
        use base64::Engine as _;
        let mut body = json!({ "name": name });
        if let Some(tag) = tag {
            body["tag"] = json!(tag);
        }
        let value = self
            .channel
            .unary(command_service(ResourceKind::Skill), "Pull", body)
            .await?;
        let digest = value
            .get("digest")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let encoded = value.get("artifact").and_then(Value::as_str).unwrap_or_default();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| StigmerError::internal(format!("artifact payload: {e}")))?;
        Ok((digest, bytes))
    }
}
