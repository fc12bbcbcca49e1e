//! Peer identity (immutable) and peer status (mutable, one per known peer).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{AddressPair, CapabilitySet, NodeId, Timestamp};

/// Wire protocol version spoken by this build.
pub const PROTOCOL_VERSION: u16 = 1;

/// Immutable identity of a node.
///
/// Fields are private: an identity is never edited in place. Substituting
/// addresses goes through [`PeerIdentity::with_addresses`], which returns a
/// new value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerIdentity {
    node_id: NodeId,
    capabilities: CapabilitySet,
    http_address: String,
    stream_address: String,
    started_at: Timestamp,
    protocol_version: u16,
}

impl PeerIdentity {
    pub fn new(
        node_id: NodeId,
        capabilities: CapabilitySet,
        addresses: AddressPair,
        started_at: Timestamp,
    ) -> Self {
        Self {
            node_id,
            capabilities,
            http_address: addresses.http_address,
            stream_address: addresses.stream_address,
            started_at,
            protocol_version: PROTOCOL_VERSION,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    pub fn http_address(&self) -> &str {
        &self.http_address
    }

    pub fn stream_address(&self) -> &str {
        &self.stream_address
    }

    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    pub fn protocol_version(&self) -> u16 {
        self.protocol_version
    }

    pub fn addresses(&self) -> AddressPair {
        AddressPair::new(self.http_address.clone(), self.stream_address.clone())
    }

    /// Copy of this identity with both addresses replaced. Every other field
    /// is carried over unchanged.
    pub fn with_addresses(&self, addresses: &AddressPair) -> Self {
        Self {
            http_address: addresses.http_address.clone(),
            stream_address: addresses.stream_address.clone(),
            ..self.clone()
        }
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} {}",
            self.node_id.short(),
            self.http_address,
            self.capabilities
        )
    }
}

/// Liveness of a peer as judged by the local node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    Alive,
    Suspect,
    Dead,
}

impl Liveness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alive => "alive",
            Self::Suspect => "suspect",
            Self::Dead => "dead",
        }
    }
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable status record for a known peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStatus {
    pub identity: PeerIdentity,
    pub liveness: Liveness,
    /// Local wall-clock time of last contact. Meaningless on any other node.
    pub last_seen: Timestamp,
    /// Logical clock incremented only by the owning node.
    pub heartbeat_seq: u64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl PeerStatus {
    pub fn new_alive(identity: PeerIdentity, heartbeat_seq: u64, now: Timestamp) -> Self {
        Self {
            identity,
            liveness: Liveness::Alive,
            last_seen: now,
            heartbeat_seq,
            metadata: BTreeMap::new(),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        self.identity.node_id()
    }

    pub fn is_alive(&self) -> bool {
        self.liveness == Liveness::Alive
    }

    /// Whether `self` carries strictly newer state than `other`.
    pub fn supersedes(&self, other: &PeerStatus) -> bool {
        self.heartbeat_seq > other.heartbeat_seq
    }

    /// Merge two records for the same node: the larger `heartbeat_seq` wins,
    /// ties keep `self`. Commutative in the winning sequence number and
    /// idempotent.
    pub fn merged(self, other: PeerStatus) -> PeerStatus {
        if other.supersedes(&self) {
            other
        } else {
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(id: &str) -> PeerIdentity {
        PeerIdentity::new(
            id.parse().unwrap(),
            CapabilitySet::parse(["storage-access"]).unwrap(),
            AddressPair::same("10.0.0.1:9000"),
            Timestamp::from_secs(1),
        )
    }

    #[test]
    fn with_addresses_substitutes_only_addresses() {
        let original = identity("a");
        let moved = original.with_addresses(&AddressPair::new("x:1", "x:2"));
        assert_eq!(moved.http_address(), "x:1");
        assert_eq!(moved.stream_address(), "x:2");
        assert_eq!(moved.node_id(), original.node_id());
        assert_eq!(moved.capabilities(), original.capabilities());
        assert_eq!(moved.started_at(), original.started_at());
        assert_eq!(original.http_address(), "10.0.0.1:9000");
    }

    #[test]
    fn merge_keeps_larger_sequence() {
        let now = Timestamp::from_secs(10);
        let five = PeerStatus::new_alive(identity("a"), 5, now);
        let seven = PeerStatus::new_alive(identity("a"), 7, now);
        assert_eq!(five.clone().merged(seven.clone()).heartbeat_seq, 7);
        assert_eq!(seven.clone().merged(five).heartbeat_seq, 7);
        assert_eq!(seven.clone().merged(seven.clone()), seven);
    }

    #[test]
    fn liveness_serializes_snake_case() {
        let json = serde_json::to_string(&Liveness::Suspect).unwrap();
        assert_eq!(json, "\"suspect\"");
    }

    #[test]
    fn status_metadata_defaults_when_absent() {
        let status = PeerStatus::new_alive(identity("a"), 1, Timestamp::EPOCH);
        let mut value = serde_json::to_value(&status).unwrap();
        value.as_object_mut().unwrap().remove("metadata");
        let back: PeerStatus = serde_json::from_value(value).unwrap();
        assert!(back.metadata.is_empty());
    }
}
