//! The per-node membership view and capability-based destination selector.
//!
//! A [`RoutingTable`] holds the local node's own status (never a routing
//! candidate) and one [`PeerStatus`] per known remote peer. Records for the
//! same node are reconciled by `heartbeat_seq` only, so merging is
//! deterministic, commutative and idempotent.

use agentmesh_messages::Departure;
use agentmesh_types::{AddressPair, CapabilitySet, Liveness, NodeId, PeerStatus, Timestamp};
use rand::seq::{IteratorRandom, SliceRandom};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::method_table::MethodTable;
use crate::overrides::AddressOverrides;

/// Default time an evicted peer stays tombstoned (60 seconds).
pub const DEFAULT_TOMBSTONE_TTL: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Tombstones
// ---------------------------------------------------------------------------

/// Why a peer left the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvictionCause {
    /// The peer announced its own departure.
    Departed,
    /// The peer went silent past the dead threshold.
    Failed,
}

/// Short-lived record of an evicted peer's last heartbeat. Gossip about the
/// peer is ignored unless it carries a strictly newer heartbeat.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tombstone {
    pub heartbeat_seq: u64,
    pub expires_at: Timestamp,
    pub cause: EvictionCause,
}

impl Tombstone {
    fn is_live(&self, now: Timestamp) -> bool {
        now < self.expires_at
    }
}

// ---------------------------------------------------------------------------
// Routing table
// ---------------------------------------------------------------------------

pub struct RoutingTable {
    local: PeerStatus,
    peers: HashMap<NodeId, PeerStatus>,
    methods: MethodTable,
    overrides: AddressOverrides,
    tombstones: HashMap<NodeId, Tombstone>,
    tombstone_ttl: Duration,
}

impl RoutingTable {
    pub fn new(local: PeerStatus, methods: MethodTable) -> Self {
        Self::with_tombstone_ttl(local, methods, DEFAULT_TOMBSTONE_TTL)
    }

    pub fn with_tombstone_ttl(
        local: PeerStatus,
        methods: MethodTable,
        tombstone_ttl: Duration,
    ) -> Self {
        Self {
            local,
            peers: HashMap::new(),
            methods,
            overrides: AddressOverrides::new(),
            tombstones: HashMap::new(),
            tombstone_ttl,
        }
    }

    // -- Local node --------------------------------------------------------------

    pub fn local(&self) -> &PeerStatus {
        &self.local
    }

    pub fn local_id(&self) -> &NodeId {
        self.local.node_id()
    }

    /// Increment the local heartbeat. Only the owning node ever does this.
    pub fn bump_heartbeat(&mut self) -> u64 {
        self.local.heartbeat_seq += 1;
        self.local.heartbeat_seq
    }

    pub fn methods(&self) -> &MethodTable {
        &self.methods
    }

    pub fn methods_mut(&mut self) -> &mut MethodTable {
        &mut self.methods
    }

    // -- Merging -------------------------------------------------------------------

    /// Reconcile an incoming record with local knowledge. Returns `true` if
    /// local knowledge changed.
    ///
    /// The record is applied iff there is no existing record or it carries a
    /// strictly larger `heartbeat_seq`. Records about the local node are
    /// ignored. An applied record counts as fresh state: `last_seen` becomes
    /// `now`, liveness becomes alive, and any address override for the peer
    /// is re-applied.
    pub fn merge(&mut self, incoming: PeerStatus, now: Timestamp) -> bool {
        let node_id = incoming.node_id().clone();
        if node_id == *self.local_id() {
            return false;
        }
        if let Some(tombstone) = self.tombstones.get(&node_id) {
            if tombstone.is_live(now) && incoming.heartbeat_seq <= tombstone.heartbeat_seq {
                return false;
            }
        }
        if let Some(existing) = self.peers.get(&node_id) {
            if !incoming.supersedes(existing) {
                return false;
            }
        }

        let mut status = incoming;
        status.last_seen = now;
        status.liveness = Liveness::Alive;
        self.overrides.apply(&mut status);
        self.tombstones.remove(&node_id);
        let previous = self.peers.insert(node_id.clone(), status);
        if previous.is_none() {
            tracing::debug!(peer = %node_id, "learned new peer");
        }
        true
    }

    /// Direct contact from the peer itself (a join). Clears any tombstone so
    /// a restarted peer is readmitted, then merges. Returns `true` if the
    /// record was new or newer.
    pub fn admit(&mut self, incoming: PeerStatus, now: Timestamp) -> bool {
        let node_id = incoming.node_id().clone();
        self.tombstones.remove(&node_id);
        let changed = self.merge(incoming, now);
        if !changed {
            self.touch(&node_id, now);
        }
        changed
    }

    /// Fresh direct contact: reset `last_seen` and restore alive.
    pub fn touch(&mut self, node_id: &NodeId, now: Timestamp) -> bool {
        match self.peers.get_mut(node_id) {
            Some(peer) => {
                peer.last_seen = now;
                peer.liveness = Liveness::Alive;
                true
            }
            None => false,
        }
    }

    // -- Removal -------------------------------------------------------------------

    pub fn remove(&mut self, node_id: &NodeId) -> Option<PeerStatus> {
        self.peers.remove(node_id)
    }

    /// Evict a peer immediately and tombstone its last known heartbeat.
    pub fn mark_dead(&mut self, node_id: &NodeId, now: Timestamp) -> Option<PeerStatus> {
        self.evict(node_id, now, EvictionCause::Failed)
    }

    pub(crate) fn evict(
        &mut self,
        node_id: &NodeId,
        now: Timestamp,
        cause: EvictionCause,
    ) -> Option<PeerStatus> {
        let mut removed = self.peers.remove(node_id)?;
        removed.liveness = Liveness::Dead;
        self.tombstones.insert(
            node_id.clone(),
            Tombstone {
                heartbeat_seq: removed.heartbeat_seq,
                expires_at: now.plus(self.tombstone_ttl),
                cause,
            },
        );
        Some(removed)
    }

    /// A peer announced it is leaving with its final heartbeat. Evicts the
    /// record unless it is newer than the announcement, and tombstones the
    /// id either way so gossip still carrying the old record cannot bring it
    /// back. Returns `true` if a record was evicted.
    pub fn depart(&mut self, node_id: &NodeId, heartbeat_seq: u64, now: Timestamp) -> bool {
        if node_id == self.local_id() {
            return false;
        }
        if let Some(existing) = self.peers.get(node_id) {
            if existing.heartbeat_seq > heartbeat_seq {
                return false;
            }
        }
        let evicted = self.peers.remove(node_id).is_some();
        let seq = match self.tombstones.get(node_id) {
            Some(t) if t.heartbeat_seq > heartbeat_seq => t.heartbeat_seq,
            _ => heartbeat_seq,
        };
        self.tombstones.insert(
            node_id.clone(),
            Tombstone {
                heartbeat_seq: seq,
                expires_at: now.plus(self.tombstone_ttl),
                cause: EvictionCause::Departed,
            },
        );
        evicted
    }

    /// Apply departures relayed by gossip. Returns the ids actually evicted.
    pub fn apply_departures(&mut self, departures: &[Departure], now: Timestamp) -> Vec<NodeId> {
        let mut evicted = Vec::new();
        for departure in departures {
            let known = self.tombstones.get(&departure.node_id).is_some_and(|t| {
                t.cause == EvictionCause::Departed && t.heartbeat_seq >= departure.heartbeat_seq
            });
            if known {
                continue;
            }
            if self.depart(&departure.node_id, departure.heartbeat_seq, now) {
                evicted.push(departure.node_id.clone());
            }
        }
        evicted
    }

    /// Live departures, for inclusion in outgoing gossip.
    pub fn departures(&self, now: Timestamp) -> Vec<Departure> {
        self.tombstones
            .iter()
            .filter(|(_, t)| t.cause == EvictionCause::Departed && t.is_live(now))
            .map(|(node_id, t)| Departure {
                node_id: node_id.clone(),
                heartbeat_seq: t.heartbeat_seq,
            })
            .collect()
    }

    pub fn tombstone(&self, node_id: &NodeId) -> Option<&Tombstone> {
        self.tombstones.get(node_id)
    }

    /// Drop expired tombstones, along with the address override of any
    /// peer that has not come back. Returns how many were dropped.
    pub fn prune_tombstones(&mut self, now: Timestamp) -> usize {
        let expired: Vec<NodeId> = self
            .tombstones
            .iter()
            .filter(|(_, t)| !t.is_live(now))
            .map(|(node_id, _)| node_id.clone())
            .collect();
        for node_id in &expired {
            self.tombstones.remove(node_id);
            if !self.peers.contains_key(node_id) {
                self.overrides.remove(node_id);
            }
        }
        expired.len()
    }

    // -- Address overrides -------------------------------------------------------

    /// Record a corrected address pair for `node_id` and apply it to the
    /// current record. Idempotent.
    pub fn set_override(&mut self, node_id: NodeId, pair: AddressPair) -> bool {
        let changed = self.overrides.insert(node_id.clone(), pair);
        if let Some(peer) = self.peers.get_mut(&node_id) {
            self.overrides.apply(peer);
        }
        changed
    }

    pub fn override_for(&self, node_id: &NodeId) -> Option<&AddressPair> {
        self.overrides.get(node_id)
    }

    /// Address pair to use for `node_id`: the override if any, otherwise
    /// the self-reported pair.
    pub fn address_of(&self, node_id: &NodeId) -> Option<AddressPair> {
        if let Some(pair) = self.overrides.get(node_id) {
            return Some(pair.clone());
        }
        self.peers.get(node_id).map(|p| p.identity.addresses())
    }

    // -- Queries -------------------------------------------------------------------

    pub fn get(&self, node_id: &NodeId) -> Option<&PeerStatus> {
        self.peers.get(node_id)
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.peers.contains_key(node_id)
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerStatus> {
        self.peers.values()
    }

    pub(crate) fn peers_mut(&mut self) -> impl Iterator<Item = &mut PeerStatus> {
        self.peers.values_mut()
    }

    /// Remote peers that are not dead.
    pub fn peer_count(&self) -> usize {
        self.peers
            .values()
            .filter(|p| p.liveness != Liveness::Dead)
            .count()
    }

    pub fn alive_count(&self) -> usize {
        self.peers.values().filter(|p| p.is_alive()).count()
    }

    pub fn suspect_count(&self) -> usize {
        self.peers
            .values()
            .filter(|p| p.liveness == Liveness::Suspect)
            .count()
    }

    /// Alive peers advertising `capability`.
    pub fn peers_with_capability(&self, capability: &str) -> Vec<PeerStatus> {
        self.peers
            .values()
            .filter(|p| p.is_alive() && p.identity.capabilities().contains(capability))
            .cloned()
            .collect()
    }

    /// Local status followed by every non-dead peer, for welcome and gossip
    /// payloads.
    pub fn snapshot(&self) -> Vec<PeerStatus> {
        std::iter::once(self.local.clone())
            .chain(
                self.peers
                    .values()
                    .filter(|p| p.liveness != Liveness::Dead)
                    .cloned(),
            )
            .collect()
    }

    // -- Routing -------------------------------------------------------------------

    /// Pick a destination for `method`: uniformly at random among alive
    /// peers holding every required capability, minus `exclude`. `None` if
    /// the method is unknown or nobody qualifies.
    pub fn route(&self, method: &str, exclude: &HashSet<NodeId>) -> Option<NodeId> {
        let required = self.methods.required(method)?;
        self.route_to(required, exclude)
    }

    /// Like [`route`](Self::route) but with an explicit capability set.
    pub fn route_to(&self, required: &CapabilitySet, exclude: &HashSet<NodeId>) -> Option<NodeId> {
        self.peers
            .values()
            .filter(|p| p.is_alive())
            .filter(|p| p.identity.capabilities().contains_all(required))
            .filter(|p| !exclude.contains(p.node_id()))
            .choose(&mut rand::thread_rng())
            .map(|p| p.node_id().clone())
    }

    /// Alive peers best suited as neighbors: smallest capability overlap
    /// with the local node first, then most tags the local node lacks. Ties
    /// are broken randomly.
    pub fn neighbor_candidates(&self, max: usize, exclude: &HashSet<NodeId>) -> Vec<NodeId> {
        let own = self.local.identity.capabilities();
        let mut candidates: Vec<&PeerStatus> = self
            .peers
            .values()
            .filter(|p| p.is_alive() && !exclude.contains(p.node_id()))
            .collect();
        candidates.shuffle(&mut rand::thread_rng());
        // Stable sort keeps the shuffled order among equals.
        candidates.sort_by_key(|p| {
            let caps = p.identity.capabilities();
            (caps.overlap(own), std::cmp::Reverse(caps.novelty_over(own)))
        });
        candidates
            .into_iter()
            .take(max)
            .map(|p| p.node_id().clone())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
