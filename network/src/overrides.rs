//! Corrected addresses for peers whose self-reported address is not
//! reachable from this node.

use agentmesh_types::{AddressPair, NodeId, PeerStatus};
use std::collections::HashMap;

#[derive(Clone, Debug, Default)]
pub struct AddressOverrides {
    entries: HashMap<NodeId, AddressPair>,
}

impl AddressOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the corrected pair for `node_id`. Returns `true` if this
    /// changed the stored entry.
    pub fn insert(&mut self, node_id: NodeId, pair: AddressPair) -> bool {
        match self.entries.get(&node_id) {
            Some(existing) if *existing == pair => false,
            _ => {
                self.entries.insert(node_id, pair);
                true
            }
        }
    }

    pub fn get(&self, node_id: &NodeId) -> Option<&AddressPair> {
        self.entries.get(node_id)
    }

    pub fn remove(&mut self, node_id: &NodeId) -> Option<AddressPair> {
        self.entries.remove(node_id)
    }

    /// Substitute the override into `status`, if one exists and the status
    /// does not already carry it. Returns `true` if the identity was replaced.
    pub fn apply(&self, status: &mut PeerStatus) -> bool {
        let Some(pair) = self.entries.get(status.node_id()) else {
            return false;
        };
        if status.identity.addresses() == *pair {
            return false;
        }
        status.identity = status.identity.with_addresses(pair);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
