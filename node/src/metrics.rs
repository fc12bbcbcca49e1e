//! Prometheus metrics for an AgentMesh node.
//!
//! Exposes counters, gauges, and histograms covering gossip, inbound
//! envelopes, event flooding, and outbound RPC. The [`NodeMetrics`] struct
//! owns a dedicated [`Registry`] so several nodes can live in one process;
//! the transport's `/metrics` endpoint encodes it via [`NodeMetrics::render`].

use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, Histogram, HistogramOpts, IntCounter, IntGauge,
    Opts, Registry, TextEncoder,
};

/// Central collection of all node-level Prometheus metrics.
pub struct NodeMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    /// Outbound gossip rounds completed.
    pub gossip_rounds: IntCounter,
    /// Inbound envelopes accepted for dispatch.
    pub envelopes_received: IntCounter,
    /// Inbound envelopes dropped (malformed, duplicate, or from a stopped node).
    pub envelopes_dropped: IntCounter,
    /// Events emitted by this node.
    pub events_emitted: IntCounter,
    /// Events delivered to local listeners, own and relayed.
    pub events_delivered: IntCounter,
    /// Outbound RPC attempts.
    pub rpc_calls: IntCounter,
    /// Outbound RPC attempts that failed.
    pub rpc_failures: IntCounter,
    /// Join attempts against seed peers.
    pub bootstrap_attempts: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    /// Known remote peers that are not dead.
    pub peer_count: IntGauge,
    /// Peers with an open stream link.
    pub neighbor_count: IntGauge,
    /// Peers currently suspected of failure.
    pub suspect_count: IntGauge,

    // ── Histograms ──────────────────────────────────────────────────────
    /// Latency of successful RPC calls, in milliseconds.
    pub rpc_latency_ms: Histogram,
}

impl NodeMetrics {
    /// Create a fresh set of metrics, all registered under a new
    /// [`Registry`].
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Counters
        let gossip_rounds = register_int_counter_with_registry!(
            Opts::new("agentmesh_gossip_rounds_total", "Gossip rounds completed"),
            registry
        )?;
        let envelopes_received = register_int_counter_with_registry!(
            Opts::new(
                "agentmesh_envelopes_received_total",
                "Inbound envelopes accepted for dispatch"
            ),
            registry
        )?;
        let envelopes_dropped = register_int_counter_with_registry!(
            Opts::new(
                "agentmesh_envelopes_dropped_total",
                "Inbound envelopes dropped"
            ),
            registry
        )?;
        let events_emitted = register_int_counter_with_registry!(
            Opts::new("agentmesh_events_emitted_total", "Events emitted locally"),
            registry
        )?;
        let events_delivered = register_int_counter_with_registry!(
            Opts::new(
                "agentmesh_events_delivered_total",
                "Events delivered to local listeners"
            ),
            registry
        )?;
        let rpc_calls = register_int_counter_with_registry!(
            Opts::new("agentmesh_rpc_calls_total", "Outbound RPC attempts"),
            registry
        )?;
        let rpc_failures = register_int_counter_with_registry!(
            Opts::new("agentmesh_rpc_failures_total", "Failed outbound RPC attempts"),
            registry
        )?;
        let bootstrap_attempts = register_int_counter_with_registry!(
            Opts::new(
                "agentmesh_bootstrap_attempts_total",
                "Join attempts against seed peers"
            ),
            registry
        )?;

        // Gauges
        let peer_count = register_int_gauge_with_registry!(
            Opts::new("agentmesh_peer_count", "Known peers that are not dead"),
            registry
        )?;
        let neighbor_count = register_int_gauge_with_registry!(
            Opts::new("agentmesh_neighbor_count", "Peers with an open stream link"),
            registry
        )?;
        let suspect_count = register_int_gauge_with_registry!(
            Opts::new("agentmesh_suspect_count", "Peers suspected of failure"),
            registry
        )?;

        // Histograms – exponential buckets covering 1 ms → ~16 s.
        let rpc_latency_ms = register_histogram_with_registry!(
            HistogramOpts::new("agentmesh_rpc_latency_ms", "RPC latency in milliseconds")
                .buckets(prometheus::exponential_buckets(1.0, 2.0, 15)?),
            registry
        )?;

        Ok(Self {
            registry,
            gossip_rounds,
            envelopes_received,
            envelopes_dropped,
            events_emitted,
            events_delivered,
            rpc_calls,
            rpc_failures,
            bootstrap_attempts,
            peer_count,
            neighbor_count,
            suspect_count,
            rpc_latency_ms,
        })
    }

    /// Encode every metric in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registries_are_independent() {
        let a = NodeMetrics::new().unwrap();
        let b = NodeMetrics::new().unwrap();
        a.gossip_rounds.inc();
        assert_eq!(a.gossip_rounds.get(), 1);
        assert_eq!(b.gossip_rounds.get(), 0);
    }

    #[test]
    fn render_includes_counters_and_gauges() {
        let metrics = NodeMetrics::new().unwrap();
        metrics.rpc_calls.inc_by(3);
        metrics.peer_count.set(2);
        metrics.rpc_latency_ms.observe(12.0);
        let text = metrics.render();
        assert!(text.contains("agentmesh_rpc_calls_total 3"));
        assert!(text.contains("agentmesh_peer_count 2"));
        assert!(text.contains("agentmesh_rpc_latency_ms_count 1"));
    }
}
