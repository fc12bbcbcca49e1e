//! Nullable network: in-process delivery between simulated nodes.
//!
//! A [`MemoryNetwork`] is a hub mapping listen addresses to handlers. Each
//! node gets its own [`MemoryTransport`] endpoint. Delivery is inline: a
//! `send` or `call` runs the receiver's handler before returning, so a test
//! can drive rounds and assert on the result without sleeping. Links can be
//! cut with [`MemoryNetwork::block`] and nodes taken off the network with
//! [`MemoryNetwork::unregister`] to simulate partitions and crashes.

use agentmesh_messages::{Envelope, MessageType};
use agentmesh_network::{EnvelopeHandler, NetworkError, Transport};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// One envelope that reached a handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub from: String,
    pub to: String,
    pub message_type: MessageType,
}

#[derive(Default)]
struct Hub {
    handlers: HashMap<String, Weak<dyn EnvelopeHandler>>,
    blocked: HashSet<(String, String)>,
    deliveries: Vec<Delivery>,
}

#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn hub(&self) -> MutexGuard<'_, Hub> {
        // A panicking test thread must not wedge every other node.
        self.hub.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A transport endpoint for one node. Its address is fixed by `listen`.
    pub fn endpoint(&self) -> Arc<MemoryTransport> {
        Arc::new(MemoryTransport {
            network: self.clone(),
            local_address: Mutex::new(None),
        })
    }

    /// Cut the link between `a` and `b` in both directions.
    pub fn block(&self, a: &str, b: &str) {
        let mut hub = self.hub();
        hub.blocked.insert((a.to_string(), b.to_string()));
        hub.blocked.insert((b.to_string(), a.to_string()));
    }

    pub fn unblock(&self, a: &str, b: &str) {
        let mut hub = self.hub();
        hub.blocked.remove(&(a.to_string(), b.to_string()));
        hub.blocked.remove(&(b.to_string(), a.to_string()));
    }

    /// Take a node off the network, as if its process died.
    pub fn unregister(&self, address: &str) {
        self.hub().handlers.remove(address);
    }

    pub fn is_registered(&self, address: &str) -> bool {
        self.hub().handlers.contains_key(address)
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.hub().deliveries.clone()
    }

    /// Number of delivered envelopes of `message_type`.
    pub fn count(&self, message_type: MessageType) -> usize {
        self.hub()
            .deliveries
            .iter()
            .filter(|d| d.message_type == message_type)
            .count()
    }

    /// Number of delivered envelopes of `message_type` addressed to `to`.
    pub fn count_to(&self, to: &str, message_type: MessageType) -> usize {
        self.hub()
            .deliveries
            .iter()
            .filter(|d| d.to == to && d.message_type == message_type)
            .count()
    }

    pub fn clear_deliveries(&self) {
        self.hub().deliveries.clear();
    }

    fn register(&self, address: &str, handler: Weak<dyn EnvelopeHandler>) {
        self.hub().handlers.insert(address.to_string(), handler);
    }

    /// Resolve the handler at `to` for a delivery from `from`, recording it.
    fn route(
        &self,
        from: &str,
        to: &str,
        message_type: MessageType,
    ) -> Result<Arc<dyn EnvelopeHandler>, NetworkError> {
        let mut hub = self.hub();
        if hub.blocked.contains(&(from.to_string(), to.to_string())) {
            return Err(NetworkError::Unreachable(to.to_string()));
        }
        let handler = hub
            .handlers
            .get(to)
            .and_then(|handler| handler.upgrade())
            .ok_or_else(|| NetworkError::Unreachable(to.to_string()))?;
        hub.deliveries.push(Delivery {
            from: from.to_string(),
            to: to.to_string(),
            message_type,
        });
        Ok(handler)
    }
}

/// One node's view of a [`MemoryNetwork`].
pub struct MemoryTransport {
    network: MemoryNetwork,
    local_address: Mutex<Option<String>>,
}

impl MemoryTransport {
    pub fn local_address(&self) -> Option<String> {
        self.local_address.lock().ok().and_then(|a| a.clone())
    }

    fn from_address(&self) -> String {
        self.local_address().unwrap_or_else(|| "unbound".to_string())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn listen(
        &self,
        listen_address: &str,
        handler: Weak<dyn EnvelopeHandler>,
    ) -> Result<(), NetworkError> {
        self.network.register(listen_address, handler);
        if let Ok(mut local) = self.local_address.lock() {
            *local = Some(listen_address.to_string());
        }
        Ok(())
    }

    async fn call(&self, addr: &str, envelope: Envelope) -> Result<Envelope, NetworkError> {
        let from = self.from_address();
        let target = self.network.route(&from, addr, envelope.message_type)?;
        target
            .handle(envelope, Some(from))
            .await
            .ok_or_else(|| NetworkError::Transport {
                addr: addr.to_string(),
                reason: "no reply".to_string(),
            })
    }

    async fn send(&self, addr: &str, envelope: Envelope) -> Result<(), NetworkError> {
        let from = self.from_address();
        let target = self.network.route(&from, addr, envelope.message_type)?;
        let Some(reply) = target.handle(envelope, Some(from.clone())).await else {
            return Ok(());
        };
        // Replies travel back over the same link.
        match self.network.route(addr, &from, reply.message_type) {
            Ok(local) => {
                local.handle(reply, Some(addr.to_string())).await;
            }
            Err(err) => tracing::debug!(%err, "reply dropped"),
        }
        Ok(())
    }

    async fn shutdown(&self) {
        if let Some(address) = self.local_address() {
            self.network.unregister(&address);
        }
    }
}
