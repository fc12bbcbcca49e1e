use proptest::prelude::*;
use std::collections::HashSet;

use agentmesh_network::{GossipEngine, MethodTable, RoutingTable};
use agentmesh_types::{AddressPair, CapabilitySet, Liveness, NodeId, PeerIdentity, PeerStatus, Timestamp};

const TAGS: [&str; 4] = ["storage-access", "language-model", "inference-logic", "validation-logic"];

fn status(node: u8, seq: u64, caps: &[&str]) -> PeerStatus {
    let identity = PeerIdentity::new(
        format!("node-{node}").parse().unwrap(),
        CapabilitySet::parse(caps.iter().copied()).unwrap(),
        AddressPair::same(format!("10.0.0.{node}:9000")),
        Timestamp::EPOCH,
    );
    PeerStatus::new_alive(identity, seq, Timestamp::EPOCH)
}

fn empty_table() -> RoutingTable {
    RoutingTable::new(status(0, 0, &[]), MethodTable::with_defaults())
}

fn final_seqs(table: &RoutingTable) -> Vec<(NodeId, u64)> {
    let mut seqs: Vec<(NodeId, u64)> = table
        .peers()
        .map(|p| (p.node_id().clone(), p.heartbeat_seq))
        .collect();
    seqs.sort();
    seqs
}

proptest! {
    /// Any delivery order of the same set of records converges to the same
    /// per-node maximum heartbeat.
    #[test]
    fn merge_order_does_not_matter(
        records in prop::collection::vec((1u8..6, 0u64..50), 1..40),
        seed in any::<u64>(),
    ) {
        let mut forward = empty_table();
        for (node, seq) in &records {
            forward.merge(status(*node, *seq, &[]), Timestamp::from_secs(1));
        }

        let mut shuffled = records.clone();
        // Deterministic permutation driven by the seed.
        let len = shuffled.len();
        for i in 0..len {
            let j = (seed.wrapping_add(i as u64 * 7919) % len as u64) as usize;
            shuffled.swap(i, j);
        }
        let mut backward = empty_table();
        for (node, seq) in shuffled.iter().rev() {
            backward.merge(status(*node, *seq, &[]), Timestamp::from_secs(1));
        }

        prop_assert_eq!(final_seqs(&forward), final_seqs(&backward));
        for (node_id, seq) in final_seqs(&forward) {
            let expected = records
                .iter()
                .filter(|(n, _)| format!("node-{n}") == node_id.as_str())
                .map(|(_, s)| *s)
                .max()
                .unwrap();
            prop_assert_eq!(seq, expected);
        }
    }

    /// Re-merging the current snapshot never changes anything.
    #[test]
    fn merge_is_idempotent(records in prop::collection::vec((1u8..6, 0u64..50), 1..20)) {
        let mut table = empty_table();
        for (node, seq) in &records {
            table.merge(status(*node, *seq, &[]), Timestamp::from_secs(1));
        }
        for peer in table.snapshot() {
            prop_assert!(!table.merge(peer, Timestamp::from_secs(2)));
        }
    }

    /// Whatever the membership looks like, a routed peer is alive and holds
    /// the method's capability.
    #[test]
    fn route_only_returns_capable_alive_peers(
        peers in prop::collection::vec((1u8..20, prop::sample::subsequence(TAGS.to_vec(), 0..3), any::<bool>()), 0..15),
        method in prop::sample::select(vec!["observe", "translate", "infer", "validate", "ask_user"]),
    ) {
        let mut table = empty_table();
        let mut suspects = HashSet::new();
        for (node, caps, suspect) in &peers {
            table.merge(status(*node, 1, caps), Timestamp::from_secs(1));
            if *suspect {
                suspects.insert(format!("node-{node}"));
            }
        }
        // Suspects stay silent long enough to be demoted but not evicted.
        let gossip = GossipEngine::default();
        for name in table.peers().map(|p| p.node_id().to_string()).collect::<Vec<_>>() {
            if !suspects.contains(&name) {
                let id: NodeId = name.parse().unwrap();
                table.touch(&id, Timestamp::from_secs(18));
            }
        }
        gossip.detect_failures(&mut table, Timestamp::from_secs(20));

        if let Some(chosen) = table.route(method, &HashSet::new()) {
            let peer = table.get(&chosen).unwrap();
            prop_assert_eq!(peer.liveness, Liveness::Alive);
            let required = table.methods().required(method).unwrap();
            prop_assert!(peer.identity.capabilities().contains_all(required));
        }
    }
}
