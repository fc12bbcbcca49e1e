//! Method handlers registered by collaborators, and inbound dispatch.

use agentmesh_messages::{RemoteError, RemoteErrorKind, RequestPayload, ResponsePayload};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Serves one RPC method. An `Err` travels back to the caller as a
/// `dispatch` error response.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn handle(&self, params: Value) -> Result<Value, String>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> MethodHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, String>> + Send,
{
    async fn handle(&self, params: Value) -> Result<Value, String> {
        (self.0)(params).await
    }
}

/// Wrap an async closure as a [`MethodHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MethodHandler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, String>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Method name → handler, shared between registration and dispatch.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn MethodHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `method`, returning the handler it replaced.
    pub async fn register(
        &self,
        method: impl Into<String>,
        handler: Arc<dyn MethodHandler>,
    ) -> Option<Arc<dyn MethodHandler>> {
        self.handlers.write().await.insert(method.into(), handler)
    }

    pub async fn unregister(&self, method: &str) -> Option<Arc<dyn MethodHandler>> {
        self.handlers.write().await.remove(method)
    }

    pub async fn contains(&self, method: &str) -> bool {
        self.handlers.read().await.contains_key(method)
    }

    pub async fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        methods.sort();
        methods
    }

    /// Run the handler for `request.method`. The registry lock is released
    /// before the handler runs, so a handler may itself make remote calls.
    pub async fn dispatch(&self, request: RequestPayload) -> ResponsePayload {
        let handler = self.handlers.read().await.get(&request.method).cloned();
        let Some(handler) = handler else {
            return ResponsePayload::Error(RemoteError::new(
                RemoteErrorKind::CapabilityMismatch,
                format!("no handler for method {}", request.method),
            ));
        };
        match handler.handle(request.params).await {
            Ok(value) => ResponsePayload::Result(value),
            Err(message) => {
                tracing::debug!(method = %request.method, error = %message, "handler failed");
                ResponsePayload::Error(RemoteError::new(RemoteErrorKind::Dispatch, message))
            }
        }
    }
}
