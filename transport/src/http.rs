//! [`Transport`] over HTTP (request/response) and WebSocket (streams).

use agentmesh_messages::Envelope;
use agentmesh_network::{EnvelopeHandler, NetworkError, Transport};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::client::{EnvelopeClient, DEFAULT_REQUEST_TIMEOUT};
use crate::links::{HandlerSlot, LinkRegistry};
use crate::server::{self, MetricsRenderer, ServerHandle};

pub struct HttpTransport {
    client: EnvelopeClient,
    links: LinkRegistry,
    handler: HandlerSlot,
    server: Mutex<Option<ServerHandle>>,
    metrics: Option<MetricsRenderer>,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::with_request_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_request_timeout(timeout: Duration) -> Self {
        let handler: HandlerSlot = Arc::new(RwLock::new(None));
        Self {
            client: EnvelopeClient::with_timeout(timeout),
            links: LinkRegistry::new(handler.clone()),
            handler,
            server: Mutex::new(None),
            metrics: None,
        }
    }

    /// Serve `GET /metrics` from `render` once listening.
    pub fn with_metrics(mut self, render: MetricsRenderer) -> Self {
        self.metrics = Some(render);
        self
    }

    /// The bound address, once `listen` has succeeded. Useful when
    /// listening on port 0.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.server.lock().await.as_ref().map(ServerHandle::local_addr)
    }

    pub fn client(&self) -> &EnvelopeClient {
        &self.client
    }

    pub async fn open_links(&self) -> Vec<String> {
        self.links.open_links().await
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn listen(
        &self,
        listen_address: &str,
        handler: Weak<dyn EnvelopeHandler>,
    ) -> Result<(), NetworkError> {
        if let Ok(mut slot) = self.handler.write() {
            *slot = Some(handler.clone());
        }
        let handle = server::serve(listen_address, handler, self.metrics.clone()).await?;
        if let Some(previous) = self.server.lock().await.replace(handle) {
            previous.shutdown().await;
        }
        Ok(())
    }

    async fn call(&self, addr: &str, envelope: Envelope) -> Result<Envelope, NetworkError> {
        self.client
            .post(addr, &envelope)
            .await?
            .ok_or_else(|| NetworkError::Transport {
                addr: addr.to_string(),
                reason: format!("no reply to {}", envelope.message_type),
            })
    }

    async fn send(&self, addr: &str, envelope: Envelope) -> Result<(), NetworkError> {
        Ok(self.links.send(addr, &envelope).await?)
    }

    async fn connect(&self, addr: &str) -> Result<(), NetworkError> {
        Ok(self.links.connect(addr).await?)
    }

    async fn disconnect(&self, addr: &str) {
        self.links.disconnect(addr).await;
    }

    async fn shutdown(&self) {
        self.links.close_all().await;
        let server = self.server.lock().await.take();
        if let Some(server) = server {
            server.shutdown().await;
        }
    }
}
