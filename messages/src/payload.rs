//! Typed payloads carried inside an [`Envelope`](crate::Envelope).
//!
//! The substrate only looks inside membership payloads (join, welcome,
//! gossip, leave). Request params, response results, and event data stay
//! opaque JSON owned by collaborators.

use agentmesh_types::{NodeId, PeerStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Default hop budget for ordinary domain events.
pub const DEFAULT_EVENT_TTL: u8 = 3;
/// Hop budget for meta/control events that must reach the whole network.
pub const META_EVENT_TTL: u8 = 5;

/// Sent by a joining node to a seed: the joiner's own status.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JoinPayload {
    pub status: PeerStatus,
}

/// Seed's reply to a join: its own status plus everything it knows.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WelcomePayload {
    pub status: PeerStatus,
    pub peers: Vec<PeerStatus>,
}

/// A node that announced its departure, as relayed by gossip.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Departure {
    pub node_id: NodeId,
    pub heartbeat_seq: u64,
}

/// Full membership snapshot pushed every gossip round.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GossipPayload {
    pub peers: Vec<PeerStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub departed: Vec<Departure>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestPayload {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Why a remote node refused or failed a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// The registered handler returned an error.
    Dispatch,
    /// The node has no handler for the method.
    CapabilityMismatch,
    /// The request envelope could not be interpreted.
    Protocol,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Outcome of a request: `{"result": ...}` or `{"error": {...}}` on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponsePayload {
    Result(Value),
    Error(RemoteError),
}

impl ResponsePayload {
    pub fn into_result(self) -> Result<Value, RemoteError> {
        match self {
            Self::Result(value) => Ok(value),
            Self::Error(err) => Err(err),
        }
    }
}

/// How far an event should travel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventClass {
    /// Ordinary domain mutation.
    #[default]
    Domain,
    /// Schema changes and other control events every node must see.
    Meta,
}

impl EventClass {
    pub fn default_ttl(&self) -> u8 {
        match self {
            Self::Domain => DEFAULT_EVENT_TTL,
            Self::Meta => META_EVENT_TTL,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventPayload {
    pub event_type: String,
    /// Node that emitted the event. The envelope sender is the last relay.
    pub origin: NodeId,
    #[serde(default)]
    pub class: EventClass,
    #[serde(default)]
    pub data: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LeavePayload {
    pub node_id: NodeId,
    /// Final heartbeat of the departing node, so receivers can tell a stale
    /// record from a later rejoin.
    pub heartbeat_seq: u64,
}
