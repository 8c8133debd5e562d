//! In-process transport
//!
//! Controllers are registered with a gRPC-shaped router exactly once,
//! before serving begins; `serve()` freezes the registry and produces the
//! channel handed to anything that needs to call a controller, including
//! other controllers. Every call, in-process or not, traverses the same
//! interceptor chain (deadline, resource-kind injection, logging), so there
//! is a single source of truth per operation.
//!
//! Because sibling clients only exist after the channel does, controllers
//! receive them post-serve through single-assignment [`ClientSlot`]s; a
//! read before assignment yields `None` and the operation degrades the way
//! its contract documents.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use stigmer_core::{ResourceKind, StigmerError, StigmerResult};

/// Deadline applied when the caller does not carry one
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// One request through the transport
#[derive(Debug, Clone)]
pub struct Request {
    pub service: String,
    pub method: String,
    /// Injected by the kind interceptor from the target service
    pub resource_kind: Option<ResourceKind>,
    /// Ambient deadline; steps read it before I/O
    pub deadline: Instant,
    pub body: Value,
}

impl Request {
    pub fn new(service: impl Into<String>, method: impl Into<String>, body: Value) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            resource_kind: None,
            deadline: Instant::now() + DEFAULT_DEADLINE,
            body,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Unary result or a server stream of resource snapshots
#[derive(Debug)]
pub enum Response {
    Unary(Value),
    Stream(mpsc::Receiver<Value>),
}

impl Response {
    pub fn into_unary(self) -> StigmerResult<Value> {
        match self {
            Response::Unary(v) => Ok(v),
            Response::Stream(_) => Err(StigmerError::internal(
                "expected a unary response, got a stream",
            )),
        }
    }

    pub fn into_stream(self) -> StigmerResult<mpsc::Receiver<Value>> {
        match self {
            Response::Stream(rx) => Ok(rx),
            Response::Unary(_) => Err(StigmerError::internal(
                "expected a stream response, got unary",
            )),
        }
    }
}

/// A registered service endpoint (one controller)
#[async_trait]
pub trait Handler: Send + Sync {
    /// Fully qualified service name, e.g. `stigmer.v1.SkillCommands`
    fn service_name(&self) -> &'static str;

    /// Kind tag stamped onto requests routed to this service
    fn resource_kind(&self) -> Option<ResourceKind> {
        None
    }

    async fn handle(&self, req: Request) -> StigmerResult<Response>;
}

/// Cross-cutting request middleware
pub trait Interceptor: Send + Sync {
    fn name(&self) -> &'static str;
    fn intercept(&self, req: &mut Request) -> StigmerResult<()>;
}

/// Rejects calls whose deadline already elapsed before dispatch
struct DeadlineInterceptor;

impl Interceptor for DeadlineInterceptor {
    fn name(&self) -> &'static str {
        "deadline"
    }

    fn intercept(&self, req: &mut Request) -> StigmerResult<()> {
        if req.remaining().is_zero() {
            return Err(StigmerError::DeadlineExceeded(format!(
                "{}/{} deadline elapsed before dispatch",
                req.service, req.method
            )));
        }
        Ok(())
    }
}

struct LoggingInterceptor;

impl Interceptor for LoggingInterceptor {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn intercept(&self, req: &mut Request) -> StigmerResult<()> {
        tracing::debug!(
            service = %req.service,
            method = %req.method,
            kind = ?req.resource_kind,
            "dispatch"
        );
        Ok(())
    }
}

struct RouterInner {
    services: RwLock<HashMap<&'static str, Arc<dyn Handler>>>,
    serving: AtomicBool,
    interceptors: Vec<Box<dyn Interceptor>>,
}

/// Service registry with a hard registration-before-serve rule
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RouterInner {
                services: RwLock::new(HashMap::new()),
                serving: AtomicBool::new(false),
                interceptors: vec![Box::new(DeadlineInterceptor), Box::new(LoggingInterceptor)],
            }),
        }
    }

    /// Register a controller. Late registration is refused: failing fast
    /// beats any lazy-registration trick.
    pub fn register(&self, handler: Arc<dyn Handler>) -> StigmerResult<()> {
        if self.inner.serving.load(Ordering::Acquire) {
            return Err(StigmerError::internal(format!(
                "cannot register {} after serve",
                handler.service_name()
            )));
        }
        let mut services = self
            .inner
            .services
            .write()
            .map_err(|_| StigmerError::internal("service registry poisoned"))?;
        let name = handler.service_name();
        if services.contains_key(name) {
            return Err(StigmerError::internal(format!(
                "service {name} registered twice"
            )));
        }
        services.insert(name, handler);
        Ok(())
    }

    /// Freeze the registry and produce the channel
    pub fn serve(&self) -> Channel {
        self.inner.serving.store(true, Ordering::Release);
        Channel {
            inner: self.inner.clone(),
        }
    }
}

/// The in-process channel. Cloneable; every call runs the interceptor chain
/// before reaching the handler.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<RouterInner>,
}

impl Channel {
    pub async fn call(&self, mut req: Request) -> StigmerResult<Response> {
        let handler = {
            let services = self
                .inner
                .services
                .read()
                .map_err(|_| StigmerError::internal("service registry poisoned"))?;
            services
                .get(req.service.as_str())
                .cloned()
                .ok_or_else(|| {
                    StigmerError::internal(format!("service {} not registered", req.service))
                })?
        };

        req.resource_kind = handler.resource_kind();
        for interceptor in &self.inner.interceptors {
            interceptor.intercept(&mut req)?;
        }
        handler.handle(req).await
    }

    pub async fn unary(
        &self,
        service: &str,
        method: &str,
        body: Value,
    ) -> StigmerResult<Value> {
        self.call(Request::new(service, method, body))
            .await?
            .into_unary()
    }

    pub async fn stream(
        &self,
        service: &str,
        method: &str,
        body: Value,
    ) -> StigmerResult<mpsc::Receiver<Value>> {
        self.call(Request::new(service, method, body))
            .await?
            .into_stream()
    }
}

/// Single-assignment slot for a sibling client injected after serve.
///
/// Reads before assignment return `None`; each caller documents whether it
/// degrades gracefully or fails its operation.
pub struct ClientSlot<T> {
    cell: OnceLock<T>,
}

impl<T> Default for ClientSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ClientSlot<T> {
    pub fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    pub fn set(&self, value: T) -> StigmerResult<()> {
        self.cell
            .set(value)
            .map_err(|_| StigmerError::internal("client slot assigned twice"))
    }

    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl Handler for EchoHandler {
        fn service_name(&self) -> &'static str {
            "stigmer.v1.Echo"
        }

        fn resource_kind(&self) -> Option<ResourceKind> {
            Some(ResourceKind::Skill)
        }

        async fn handle(&self, req: Request) -> StigmerResult<Response> {
            // the kind interceptor ran before us
            assert_eq!(req.resource_kind, Some(ResourceKind::Skill));
            Ok(Response::Unary(req.body))
        }
    }

    #[tokio::test]
    async fn calls_traverse_the_chain_and_reach_the_handler() {
        let router = Router::new();
        router.register(Arc::new(EchoHandler)).unwrap();
        let channel = router.serve();

        let out = channel
            .unary("stigmer.v1.Echo", "Ping", json!({"x": 1}))
            .await
            .unwrap();
        assert_eq!(out, json!({"x": 1}));
    }

    #[tokio::test]
    async fn registration_after_serve_is_refused() {
        let router = Router::new();
        let _channel = router.serve();
        let err = router.register(Arc::new(EchoHandler)).unwrap_err();
        assert!(err.to_string().contains("after serve"));
    }

    #[tokio::test]
    async fn duplicate_registration_is_refused() {
        let router = Router::new();
        router.register(Arc::new(EchoHandler)).unwrap();
        assert!(router.register(Arc::new(EchoHandler)).is_err());
    }

    #[tokio::test]
    async fn expired_deadline_fails_before_dispatch() {
        let router = Router::new();
        router.register(Arc::new(EchoHandler)).unwrap();
        let channel = router.serve();

        let req = Request::new("stigmer.v1.Echo", "Ping", Value::Null)
            .with_deadline(Instant::now() - Duration::from_millis(1));
        let err = channel.call(req).await.unwrap_err();
        assert!(matches!(err, StigmerError::DeadlineExceeded(_)));
    }

    #[test]
    fn client_slot_is_single_assignment() {
        let slot: ClientSlot<u32> = ClientSlot::new();
        assert!(slot.get().is_none());
        slot.set(7).unwrap();
        assert_eq!(slot.get(), Some(&7));
        assert!(slot.set(8).is_err());
    }
}
