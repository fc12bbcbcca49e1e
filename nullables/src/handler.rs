//! No-op collaborator: records what it receives and never replies.

use agentmesh_messages::{Envelope, MessageType};
use agentmesh_network::EnvelopeHandler;
use async_trait::async_trait;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct NullHandler {
    received: Mutex<Vec<(Envelope, Option<String>)>>,
}

impl NullHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every envelope handed to this handler, with the observed remote.
    pub fn received(&self) -> Vec<(Envelope, Option<String>)> {
        self.received
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, message_type: MessageType) -> usize {
        self.received()
            .iter()
            .filter(|(e, _)| e.message_type == message_type)
            .count()
    }
}

#[async_trait]
impl EnvelopeHandler for NullHandler {
    async fn handle(&self, envelope: Envelope, remote: Option<String>) -> Option<Envelope> {
        if let Ok(mut received) = self.received.lock() {
            received.push((envelope, remote));
        }
        None
    }
}
