//! Seams between node logic and the wire.
//!
//! A [`Transport`] moves envelopes between nodes. Inbound envelopes are
//! handed to an [`EnvelopeHandler`], normally the node itself. The handler
//! is held weakly so a node owning its transport does not keep itself
//! alive through it.

use agentmesh_messages::Envelope;
use async_trait::async_trait;
use std::sync::Weak;

use crate::NetworkError;

#[async_trait]
pub trait EnvelopeHandler: Send + Sync {
    /// Process one inbound envelope. `remote` is the observed address of
    /// the connection it arrived on, when the transport knows it. A returned
    /// envelope is the direct reply (welcome, response, pong).
    async fn handle(&self, envelope: Envelope, remote: Option<String>) -> Option<Envelope>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Start accepting inbound envelopes on `listen_address`.
    async fn listen(
        &self,
        listen_address: &str,
        handler: Weak<dyn EnvelopeHandler>,
    ) -> Result<(), NetworkError>;

    /// Request/response exchange with the HTTP endpoint at `addr` (join,
    /// request). Resolves to the peer's reply envelope.
    async fn call(&self, addr: &str, envelope: Envelope) -> Result<Envelope, NetworkError>;

    /// Fire-and-forget delivery over the stream endpoint at `addr` (gossip,
    /// event, ping, leave). Any reply the peer sends back is delivered to
    /// the local handler.
    async fn send(&self, addr: &str, envelope: Envelope) -> Result<(), NetworkError>;

    /// Open a persistent stream link to `addr` ahead of the first send.
    async fn connect(&self, _addr: &str) -> Result<(), NetworkError> {
        Ok(())
    }

    /// Close the stream link to `addr`, if one is open.
    async fn disconnect(&self, _addr: &str) {}

    /// Stop listening and close every link.
    async fn shutdown(&self) {}
}
