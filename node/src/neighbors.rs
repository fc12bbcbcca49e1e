//! The set of peers this node keeps persistent stream links to.
//!
//! Links are tracked with their direction. Outbound links are the ones this
//! node chose and opened; inbound links belong to peers that picked this
//! node as one of theirs. Both directions receive gossip and events, so a
//! peer that joins after everyone else is saturated is still reached. Each
//! direction has its own budget of `max` links.

use agentmesh_types::NodeId;
use std::collections::BTreeMap;

/// Default upper bound on neighbors in each direction.
pub const DEFAULT_MAX_NEIGHBORS: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkDirection {
    /// Opened by this node from its neighbor candidates.
    Outbound,
    /// Opened by the peer; recorded when it first contacts this node.
    Inbound,
}

#[derive(Clone, Debug)]
struct Link {
    stream_address: String,
    direction: LinkDirection,
}

/// Neighbor id → stream address and link direction.
#[derive(Clone, Debug)]
pub struct NeighborSet {
    max: usize,
    links: BTreeMap<NodeId, Link>,
}

impl NeighborSet {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            links: BTreeMap::new(),
        }
    }

    /// Add an outbound neighbor. Returns `false` if the outbound budget is
    /// spent; an existing neighbor just has its address updated.
    pub fn insert(&mut self, node_id: NodeId, stream_address: String) -> bool {
        self.add(node_id, stream_address, LinkDirection::Outbound)
    }

    /// Record a peer that linked to this node. Returns `false` if the
    /// inbound budget is spent; an existing neighbor keeps its direction.
    pub fn accept(&mut self, node_id: NodeId, stream_address: String) -> bool {
        self.add(node_id, stream_address, LinkDirection::Inbound)
    }

    fn add(&mut self, node_id: NodeId, stream_address: String, direction: LinkDirection) -> bool {
        if let Some(link) = self.links.get_mut(&node_id) {
            link.stream_address = stream_address;
            return true;
        }
        if self.count(direction) >= self.max {
            return false;
        }
        self.links.insert(
            node_id,
            Link {
                stream_address,
                direction,
            },
        );
        true
    }

    pub fn remove(&mut self, node_id: &NodeId) -> Option<String> {
        self.links.remove(node_id).map(|link| link.stream_address)
    }

    /// Drop every neighbor for which `keep` is false, returning the dropped
    /// links.
    pub fn retain<F>(&mut self, mut keep: F) -> Vec<(NodeId, String)>
    where
        F: FnMut(&NodeId) -> bool,
    {
        let dropped: Vec<NodeId> = self
            .links
            .keys()
            .filter(|id| !keep(id))
            .cloned()
            .collect();
        dropped
            .into_iter()
            .filter_map(|id| self.remove(&id).map(|addr| (id, addr)))
            .collect()
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.links.contains_key(node_id)
    }

    pub fn address(&self, node_id: &NodeId) -> Option<&str> {
        self.links.get(node_id).map(|link| link.stream_address.as_str())
    }

    pub fn direction(&self, node_id: &NodeId) -> Option<LinkDirection> {
        self.links.get(node_id).map(|link| link.direction)
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.links.keys().cloned().collect()
    }

    /// Every link in both directions.
    pub fn links(&self) -> Vec<(NodeId, String)> {
        self.links
            .iter()
            .map(|(id, link)| (id.clone(), link.stream_address.clone()))
            .collect()
    }

    pub fn count(&self, direction: LinkDirection) -> usize {
        self.links
            .values()
            .filter(|link| link.direction == direction)
            .count()
    }

    /// Outbound slots still open for refilling from candidates.
    pub fn free_slots(&self) -> usize {
        self.max.saturating_sub(self.count(LinkDirection::Outbound))
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn clear(&mut self) -> Vec<(NodeId, String)> {
        std::mem::take(&mut self.links)
            .into_iter()
            .map(|(id, link)| (id, link.stream_address))
            .collect()
    }
}

impl Default for NeighborSet {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_NEIGHBORS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> NodeId {
        s.parse().unwrap()
    }

    #[test]
    fn insert_respects_capacity() {
        let mut set = NeighborSet::new(2);
        assert!(set.insert(id("a"), "a:1".into()));
        assert!(set.insert(id("b"), "b:1".into()));
        assert!(!set.insert(id("c"), "c:1".into()));
        assert_eq!(set.free_slots(), 0);
        // Updating an existing neighbor is always allowed.
        assert!(set.insert(id("a"), "a:2".into()));
        assert_eq!(set.address(&id("a")), Some("a:2"));
    }

    #[test]
    fn retain_returns_dropped_links() {
        let mut set = NeighborSet::default();
        set.insert(id("a"), "a:1".into());
        set.insert(id("b"), "b:1".into());
        let dropped = set.retain(|n| n.as_str() != "a");
        assert_eq!(dropped, vec![(id("a"), "a:1".to_string())]);
        assert_eq!(set.ids(), vec![id("b")]);
        assert_eq!(set.free_slots(), DEFAULT_MAX_NEIGHBORS - 1);
    }

    #[test]
    fn inbound_links_have_their_own_budget() {
        let mut set = NeighborSet::new(1);
        assert!(set.insert(id("a"), "a:1".into()));
        assert_eq!(set.free_slots(), 0);

        assert!(set.accept(id("b"), "b:1".into()));
        assert!(!set.accept(id("c"), "c:1".into()));
        assert_eq!(set.len(), 2);
        assert_eq!(set.direction(&id("b")), Some(LinkDirection::Inbound));
        assert_eq!(
            set.links(),
            vec![(id("a"), "a:1".to_string()), (id("b"), "b:1".to_string())]
        );
        // An outbound slot is not spent by an inbound link.
        assert!(set.remove(&id("a")).is_some());
        assert_eq!(set.free_slots(), 1);
    }

    #[test]
    fn accept_keeps_existing_direction() {
        let mut set = NeighborSet::default();
        set.insert(id("a"), "a:1".into());
        assert!(set.accept(id("a"), "a:2".into()));
        assert_eq!(set.direction(&id("a")), Some(LinkDirection::Outbound));
        assert_eq!(set.address(&id("a")), Some("a:2"));
        assert_eq!(set.count(LinkDirection::Inbound), 0);
    }

    #[test]
    fn clear_empties_the_set() {
        let mut set = NeighborSet::default();
        set.insert(id("a"), "a:1".into());
        assert_eq!(set.clear().len(), 1);
        assert!(set.is_empty());
    }
}
