//! Pre-built [`tracing::Span`] constructors for common node operations.
//!
//! Using consistent span names and field sets makes it easy to filter,
//! search, and correlate traces across a mesh of nodes.

use tracing::{debug_span, info_span, Span};

/// Span covering one outbound gossip round.
pub fn gossip_round_span(node: &str, heartbeat: u64) -> Span {
    debug_span!("gossip_round", node = %node, heartbeat = heartbeat)
}

/// Span covering one failure-detection scan (keep-alive, eviction, refill).
pub fn failure_scan_span(node: &str) -> Span {
    debug_span!("failure_scan", node = %node)
}

/// Span covering an outbound RPC across all of its attempts.
pub fn rpc_call_span(method: &str) -> Span {
    info_span!("rpc_call", method = %method)
}

/// Span covering the handling of a single inbound envelope.
pub fn dispatch_span(sender: &str, msg_type: &str) -> Span {
    debug_span!("dispatch", sender = %sender, msg_type = %msg_type)
}

/// Span covering the local delivery and relay of one event.
pub fn flood_span(event_type: &str, ttl: u8) -> Span {
    debug_span!("flood", event_type = %event_type, ttl = ttl)
}

/// Span covering a bootstrap pass over the seed peers.
pub fn bootstrap_span(seed_count: usize) -> Span {
    info_span!("bootstrap", seeds = seed_count)
}
