//! Membership dissemination and failure detection.
//!
//! Every gossip round the node bumps its own heartbeat and pushes its full
//! snapshot to a few random neighbors. Receivers merge each record by
//! heartbeat. A separate periodic scan demotes silent peers to suspect and
//! evicts them once they pass the dead threshold.

use agentmesh_messages::GossipPayload;
use agentmesh_types::{Liveness, NodeId, Timestamp};
use rand::seq::SliceRandom;
use std::time::Duration;

use crate::routing_table::{EvictionCause, RoutingTable};

/// Default number of neighbors contacted per gossip round.
pub const DEFAULT_FANOUT: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GossipConfig {
    pub interval: Duration,
    pub fanout: usize,
    pub suspect_after: Duration,
    pub dead_after: Duration,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            fanout: DEFAULT_FANOUT,
            suspect_after: Duration::from_secs(15),
            dead_after: Duration::from_secs(30),
        }
    }
}

/// Outcome of one failure-detection scan.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FailureReport {
    /// Peers newly demoted from alive to suspect.
    pub suspected: Vec<NodeId>,
    /// Peers declared dead and removed from the table.
    pub evicted: Vec<NodeId>,
}

impl FailureReport {
    pub fn is_empty(&self) -> bool {
        self.suspected.is_empty() && self.evicted.is_empty()
    }
}

/// What a received gossip payload did to the local table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GossipOutcome {
    /// Records that were new or carried a newer heartbeat.
    pub updated: usize,
    /// Peers evicted because the payload listed their departure.
    pub departed: Vec<NodeId>,
}

/// A prepared outbound round: the payload and who gets it.
#[derive(Clone, Debug)]
pub struct GossipRound {
    pub heartbeat_seq: u64,
    pub payload: GossipPayload,
    pub targets: Vec<NodeId>,
}

#[derive(Clone, Debug, Default)]
pub struct GossipEngine {
    config: GossipConfig,
}

impl GossipEngine {
    pub fn new(config: GossipConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GossipConfig {
        &self.config
    }

    /// Bump the local heartbeat and build the snapshot for this round,
    /// addressed to `min(fanout, neighbors)` random neighbors.
    pub fn prepare_round(
        &self,
        table: &mut RoutingTable,
        neighbors: &[NodeId],
        now: Timestamp,
    ) -> GossipRound {
        let heartbeat_seq = table.bump_heartbeat();
        GossipRound {
            heartbeat_seq,
            payload: GossipPayload {
                peers: table.snapshot(),
                departed: table.departures(now),
            },
            targets: select_targets(neighbors, self.config.fanout),
        }
    }

    /// Merge a received payload. The sender is touched as fresh direct
    /// contact after its own record is merged.
    pub fn receive(
        &self,
        table: &mut RoutingTable,
        sender: &NodeId,
        payload: GossipPayload,
        now: Timestamp,
    ) -> GossipOutcome {
        let departed = table.apply_departures(&payload.departed, now);
        let mut updated = 0;
        for status in payload.peers {
            if table.merge(status, now) {
                updated += 1;
            }
        }
        table.touch(sender, now);
        GossipOutcome { updated, departed }
    }

    /// Demote peers silent for longer than `suspect_after` and evict those
    /// silent for longer than `dead_after`.
    pub fn detect_failures(&self, table: &mut RoutingTable, now: Timestamp) -> FailureReport {
        detect_failures(table, now, self.config.suspect_after, self.config.dead_after)
    }
}

/// Choose `min(fanout, candidates.len())` distinct candidates uniformly at
/// random.
pub fn select_targets<T: Clone>(candidates: &[T], fanout: usize) -> Vec<T> {
    candidates
        .choose_multiple(&mut rand::thread_rng(), fanout)
        .cloned()
        .collect()
}

pub fn detect_failures(
    table: &mut RoutingTable,
    now: Timestamp,
    suspect_after: Duration,
    dead_after: Duration,
) -> FailureReport {
    let mut report = FailureReport::default();
    for peer in table.peers_mut() {
        let silence = peer.last_seen.elapsed_since(now);
        if silence > dead_after {
            peer.liveness = Liveness::Dead;
            report.evicted.push(peer.node_id().clone());
        } else if silence > suspect_after && peer.liveness == Liveness::Alive {
            peer.liveness = Liveness::Suspect;
            report.suspected.push(peer.node_id().clone());
        }
    }
    for node_id in &report.evicted {
        table.evict(node_id, now, EvictionCause::Failed);
    }
    report
}

/// Rounds needed for a rumor to reach `n` nodes when each informed node
/// tells `fanout` others per round: `ceil(log_fanout(n))`.
pub fn expected_rounds(n: usize, fanout: usize) -> u32 {
    if n <= 1 {
        return 0;
    }
    if fanout <= 1 {
        return (n - 1) as u32;
    }
    let mut reached = 1usize;
    let mut rounds = 0;
    while reached < n {
        reached = reached.saturating_mul(fanout);
        rounds += 1;
    }
    rounds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MethodTable;
    use agentmesh_messages::Departure;
    use agentmesh_types::{AddressPair, CapabilitySet, PeerIdentity, PeerStatus};

    fn id(s: &str) -> NodeId {
        s.parse().unwrap()
    }

    fn status(node: &str, seq: u64) -> PeerStatus {
        let identity = PeerIdentity::new(
            id(node),
            CapabilitySet::new(),
            AddressPair::same(format!("{node}:1")),
            Timestamp::EPOCH,
        );
        PeerStatus::new_alive(identity, seq, Timestamp::EPOCH)
    }

    fn table(local: &str) -> RoutingTable {
        RoutingTable::new(status(local, 0), MethodTable::with_defaults())
    }

    fn at(secs: u64) -> Timestamp {
        Timestamp::from_secs(secs)
    }

    #[test]
    fn select_targets_caps_at_fanout() {
        let neighbors: Vec<u32> = (0..10).collect();
        let picked = select_targets(&neighbors, 3);
        assert_eq!(picked.len(), 3);
        let mut dedup = picked.clone();
        dedup.sort_unstable();
        dedup.dedup();
        assert_eq!(dedup.len(), 3);

        assert_eq!(select_targets(&neighbors[..2], 3).len(), 2);
        assert!(select_targets::<u32>(&[], 3).is_empty());
    }

    #[test]
    fn prepare_round_bumps_heartbeat() {
        let engine = GossipEngine::default();
        let mut t = table("self");
        t.merge(status("a", 1), at(0));
        let round = engine.prepare_round(&mut t, &[id("a")], at(1));
        assert_eq!(round.heartbeat_seq, 1);
        assert_eq!(round.targets, vec![id("a")]);
        assert_eq!(round.payload.peers.len(), 2);
        assert_eq!(round.payload.peers[0].heartbeat_seq, 1);
        assert_eq!(engine.prepare_round(&mut t, &[], at(2)).heartbeat_seq, 2);
    }

    #[test]
    fn receive_merges_and_touches_sender() {
        let engine = GossipEngine::default();
        let mut t = table("self");
        t.merge(status("a", 1), at(0));
        let payload = GossipPayload {
            peers: vec![status("b", 2), status("c", 1), status("self", 50)],
            departed: vec![],
        };
        let outcome = engine.receive(&mut t, &id("a"), payload, at(10));
        assert_eq!(outcome.updated, 2);
        assert_eq!(t.get(&id("a")).unwrap().last_seen, at(10));
        assert_eq!(t.peer_count(), 3);
    }

    #[test]
    fn receive_applies_departures() {
        let engine = GossipEngine::default();
        let mut t = table("self");
        t.merge(status("gone", 4), at(0));
        let payload = GossipPayload {
            peers: vec![status("gone", 4)],
            departed: vec![Departure {
                node_id: id("gone"),
                heartbeat_seq: 4,
            }],
        };
        let outcome = engine.receive(&mut t, &id("relay"), payload, at(1));
        assert_eq!(outcome.departed, vec![id("gone")]);
        assert_eq!(outcome.updated, 0);
        assert!(!t.contains(&id("gone")));
    }

    #[test]
    fn silence_thresholds() {
        let engine = GossipEngine::default();
        let mut t = table("self");
        t.merge(status("quiet", 1), at(0));

        assert!(engine.detect_failures(&mut t, at(15)).is_empty());

        let report = engine.detect_failures(&mut t, at(16));
        assert_eq!(report.suspected, vec![id("quiet")]);
        assert_eq!(t.get(&id("quiet")).unwrap().liveness, Liveness::Suspect);

        // Already suspect: not reported twice.
        assert!(engine.detect_failures(&mut t, at(20)).is_empty());

        let report = engine.detect_failures(&mut t, at(31));
        assert_eq!(report.evicted, vec![id("quiet")]);
        assert!(!t.contains(&id("quiet")));
        assert!(t.tombstone(&id("quiet")).is_some());
    }

    #[test]
    fn fresh_contact_restores_alive() {
        let engine = GossipEngine::default();
        let mut t = table("self");
        t.merge(status("p", 1), at(0));
        engine.detect_failures(&mut t, at(16));
        assert!(t.touch(&id("p"), at(17)));
        assert!(t.get(&id("p")).unwrap().is_alive());
        assert!(engine.detect_failures(&mut t, at(30)).is_empty());
    }

    #[test]
    fn expected_rounds_is_log_fanout() {
        assert_eq!(expected_rounds(1, 3), 0);
        assert_eq!(expected_rounds(3, 3), 1);
        assert_eq!(expected_rounds(9, 3), 2);
        assert_eq!(expected_rounds(10, 3), 3);
        assert_eq!(expected_rounds(100, 3), 5);
        assert_eq!(expected_rounds(4, 1), 3);
    }
}
