//! Bounded, expiring set of recently seen event ids.
//!
//! Prevents the same event from being delivered or relayed twice when it
//! reaches a node along several paths. Entries leave the set when it is
//! full (oldest first) or once they are older than the configured TTL.

use agentmesh_messages::MessageId;
use agentmesh_types::Timestamp;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;

/// Default dedup capacity: track the last 65 536 event ids.
pub const DEFAULT_DEDUP_CAPACITY: usize = 65_536;

/// Default retention for a seen id (10 minutes).
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(600);

pub struct EventDedup {
    capacity: usize,
    ttl: Duration,
    ids: HashSet<MessageId>,
    /// Insertion order with the time each id was first seen.
    order: VecDeque<(MessageId, Timestamp)>,
}

impl EventDedup {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            ttl,
            ids: HashSet::with_capacity(capacity.min(4096)),
            order: VecDeque::with_capacity(capacity.min(4096)),
        }
    }

    /// Check whether `id` has been seen and record it if not.
    ///
    /// Returns `true` for a duplicate. Returns `false` for a new id, which
    /// is recorded for future checks.
    pub fn is_duplicate(&mut self, id: MessageId, now: Timestamp) -> bool {
        self.expire(now);
        if self.ids.contains(&id) {
            return true;
        }
        if self.ids.len() >= self.capacity {
            if let Some((oldest, _)) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.ids.insert(id);
        self.order.push_back((id, now));
        false
    }

    /// Drop every id older than the TTL. Returns how many were dropped.
    pub fn expire(&mut self, now: Timestamp) -> usize {
        let mut dropped = 0;
        while let Some((id, seen_at)) = self.order.front().copied() {
            if !seen_at.has_expired(self.ttl, now) {
                break;
            }
            self.order.pop_front();
            self.ids.remove(&id);
            dropped += 1;
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl Default for EventDedup {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY, DEFAULT_DEDUP_TTL)
    }
}
