//! Relay planning for flooded events.
//!
//! An event carries a hop budget. Each relay decrements it and forwards to
//! every neighbor except the one the event arrived from, as long as the
//! decremented budget is still positive. Duplicate suppression is the job
//! of [`EventDedup`](crate::EventDedup); this module only decides where an
//! accepted event goes next.

use agentmesh_messages::{Envelope, MessageType};
use agentmesh_types::NodeId;

#[derive(Clone, Debug)]
pub struct RelayPlan {
    /// The event as it should be sent on: same id, this node as sender,
    /// decremented TTL.
    pub envelope: Envelope,
    pub targets: Vec<NodeId>,
}

/// Decide whether and where to forward an inbound event.
///
/// Returns `None` when the budget is exhausted, when nobody is left to
/// forward to, or when `envelope` is not an event.
pub fn plan_relay(envelope: &Envelope, relay_id: &NodeId, neighbors: &[NodeId]) -> Option<RelayPlan> {
    if envelope.message_type != MessageType::Event {
        return None;
    }
    let next_ttl = envelope.ttl.checked_sub(1).filter(|ttl| *ttl > 0)?;
    let targets: Vec<NodeId> = neighbors
        .iter()
        .filter(|n| **n != envelope.sender_id && *n != relay_id)
        .cloned()
        .collect();
    if targets.is_empty() {
        return None;
    }
    Some(RelayPlan {
        envelope: envelope.relayed(relay_id.clone(), next_ttl),
        targets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentmesh_messages::{EventClass, EventPayload};
    use serde_json::Value;

    fn id(s: &str) -> NodeId {
        s.parse().unwrap()
    }

    fn event_from(sender: &str, ttl: u8) -> Envelope {
        let payload = EventPayload {
            event_type: "changed".into(),
            origin: id("origin"),
            class: EventClass::Domain,
            data: Value::Null,
        };
        Envelope::event(id(sender), &payload, ttl).unwrap()
    }

    #[test]
    fn forwards_to_everyone_but_the_previous_hop() {
        let event = event_from("a", 3);
        let plan = plan_relay(&event, &id("me"), &[id("a"), id("b"), id("c")]).unwrap();
        assert_eq!(plan.targets, vec![id("b"), id("c")]);
        assert_eq!(plan.envelope.ttl, 2);
        assert_eq!(plan.envelope.sender_id, id("me"));
        assert_eq!(plan.envelope.message_id, event.message_id);
    }

    #[test]
    fn stops_when_budget_runs_out() {
        let neighbors = [id("b")];
        assert!(plan_relay(&event_from("a", 2), &id("me"), &neighbors).is_some());
        assert!(plan_relay(&event_from("a", 1), &id("me"), &neighbors).is_none());
        assert!(plan_relay(&event_from("a", 0), &id("me"), &neighbors).is_none());
    }

    #[test]
    fn nothing_to_do_without_other_neighbors() {
        assert!(plan_relay(&event_from("a", 3), &id("me"), &[id("a")]).is_none());
        assert!(plan_relay(&event_from("a", 3), &id("me"), &[]).is_none());
    }

    #[test]
    fn ignores_non_events() {
        let ping = Envelope::ping(id("a"));
        assert!(plan_relay(&ping, &id("me"), &[id("b")]).is_none());
    }
}
