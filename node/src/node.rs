//! The AgentMesh node: wires membership, gossip, routing, dispatch and
//! event flooding to a [`Transport`].

use agentmesh_messages::{
    Envelope, EventClass, EventPayload, GossipPayload, JoinPayload, LeavePayload, MessageId,
    MessageType, RemoteError, RemoteErrorKind, RequestPayload, ResponsePayload, WelcomePayload,
};
use agentmesh_network::{
    plan_relay, Clock, EnvelopeHandler, EventDedup, FailureReport, GossipEngine, RoutingTable,
    SystemClock, Transport,
};
use agentmesh_types::{
    is_unspecified_host, split_host_port, NodeId, PeerIdentity, PeerStatus,
};
use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, RwLock, RwLockReadGuard};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::NodeConfig;
use crate::events::EventBus;
use crate::handlers::{HandlerRegistry, MethodHandler};
use crate::metrics::NodeMetrics;
use crate::neighbors::NeighborSet;
use crate::shutdown::{wait_for_shutdown, ShutdownController};
use crate::tracing_spans::{
    bootstrap_span, dispatch_span, failure_scan_span, flood_span, gossip_round_span,
    rpc_call_span,
};
use crate::NodeError;

/// Maximum time to wait for background tasks during shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of a node. Only moves forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    New,
    Bootstrapping,
    Running,
    Leaving,
    Stopped,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Bootstrapping => "bootstrapping",
            Self::Running => "running",
            Self::Leaving => "leaving",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single attempt of an outbound call that did not produce a value.
enum AttemptError {
    /// Worth trying another peer.
    Retry(String),
    /// The remote handler ran and failed.
    Remote(RemoteError),
}

/// State shared by the public handle, the background loops and the
/// transport's inbound path.
///
/// Lock order is routing, then neighbors. No lock is held across a
/// transport await: with in-process delivery a send can re-enter this node.
pub(crate) struct NodeInner {
    config: NodeConfig,
    node_id: NodeId,
    state: std::sync::RwLock<NodeState>,
    routing: RwLock<RoutingTable>,
    neighbors: RwLock<NeighborSet>,
    dedup: Mutex<EventDedup>,
    gossip: GossipEngine,
    handlers: HandlerRegistry,
    events: EventBus,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    metrics: Arc<NodeMetrics>,
    shutdown: ShutdownController,
}

/// Handle to a running (or not yet started) node.
pub struct AgentNode {
    inner: Arc<NodeInner>,
    task_handles: Vec<JoinHandle<()>>,
}

impl AgentNode {
    /// Create a node with the system clock and a fresh metrics registry.
    pub fn new(config: NodeConfig, transport: Arc<dyn Transport>) -> Result<Self, NodeError> {
        Self::with_clock(config, transport, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: NodeConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, NodeError> {
        let metrics = Arc::new(NodeMetrics::new()?);
        Self::with_parts(config, transport, clock, metrics)
    }

    /// Create a node around existing metrics, e.g. ones the transport's
    /// `/metrics` endpoint already renders.
    pub fn with_parts(
        config: NodeConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        metrics: Arc<NodeMetrics>,
    ) -> Result<Self, NodeError> {
        config.validate()?;

        let node_id = NodeId::generate();
        let now = clock.now();
        let identity = PeerIdentity::new(
            node_id.clone(),
            config.capability_set()?,
            config.advertised_addresses(),
            now,
        );
        let mut local = PeerStatus::new_alive(identity, 0, now);
        local.metadata = config.metadata.clone();
        let routing =
            RoutingTable::with_tombstone_ttl(local, config.method_table()?, config.tombstone_ttl());

        tracing::info!(
            node = %node_id,
            listen = %config.listen_address,
            capabilities = ?config.capabilities,
            "node created"
        );

        let inner = NodeInner {
            node_id,
            state: std::sync::RwLock::new(NodeState::New),
            routing: RwLock::new(routing),
            neighbors: RwLock::new(NeighborSet::new(config.max_neighbors)),
            dedup: Mutex::new(EventDedup::new(config.dedup_capacity, config.dedup_ttl())),
            gossip: GossipEngine::new(config.gossip_config()),
            handlers: HandlerRegistry::new(),
            events: EventBus::new(),
            transport,
            clock,
            metrics,
            shutdown: ShutdownController::new(),
            config,
        };
        Ok(Self {
            inner: Arc::new(inner),
            task_handles: Vec::new(),
        })
    }

    /// Listen, join the seed peers and start the gossip and
    /// failure-detection loops.
    ///
    /// Unreachable seeds are logged, not fatal: the failure-detection loop
    /// retries them while the routing table stays empty.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        self.inner
            .transition(&[NodeState::New], NodeState::Bootstrapping, "start")?;

        let weak_inner = Arc::downgrade(&self.inner);
        let handler: Weak<dyn EnvelopeHandler> = weak_inner;
        if let Err(e) = self
            .inner
            .transport
            .listen(&self.inner.config.listen_address, handler)
            .await
        {
            self.inner.set_state(NodeState::Stopped);
            return Err(e.into());
        }

        let joined = self.inner.bootstrap().await;
        self.inner
            .transition(&[NodeState::Bootstrapping], NodeState::Running, "finish bootstrap")?;
        tracing::info!(
            node = %self.inner.node_id,
            seeds_joined = joined,
            peers = self.inner.routing.read().await.peer_count(),
            "node running"
        );

        // ── Gossip loop ─────────────────────────────────────────────────
        let inner = Arc::clone(&self.inner);
        let mut shutdown_rx = self.inner.shutdown.subscribe();
        let period = self.inner.config.gossip_config().interval;
        self.task_handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    biased;
                    _ = wait_for_shutdown(&mut shutdown_rx) => {
                        tracing::debug!("gossip loop shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        inner.gossip_round().await;
                    }
                }
            }
        }));

        // ── Failure-detection loop (keep-alive, eviction, reconnect) ────
        let inner = Arc::clone(&self.inner);
        let mut shutdown_rx = self.inner.shutdown.subscribe();
        let period = self.inner.config.failure_check_interval();
        self.task_handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    biased;
                    _ = wait_for_shutdown(&mut shutdown_rx) => {
                        tracing::debug!("failure-detection loop shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        inner.failure_detection_round().await;
                    }
                }
            }
        }));

        Ok(())
    }

    /// Announce departure, stop the loops and shut the transport down.
    pub async fn stop(&mut self) -> Result<(), NodeError> {
        let previous = self.inner.transition(
            &[NodeState::New, NodeState::Running],
            NodeState::Leaving,
            "stop",
        )?;
        if previous == NodeState::New {
            self.inner.set_state(NodeState::Stopped);
            return Ok(());
        }
        tracing::info!(node = %self.inner.node_id, "node leaving");

        self.inner.announce_leave().await;
        self.inner.shutdown.shutdown();

        let handles: Vec<JoinHandle<()>> = self.task_handles.drain(..).collect();
        let wait_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        let timed_out = tokio::time::timeout(SHUTDOWN_TIMEOUT, wait_all).await.is_err();

        let links = self.inner.neighbors.write().await.clear();
        for (_, addr) in links {
            self.inner.transport.disconnect(&addr).await;
        }
        self.inner.transport.shutdown().await;
        self.inner.refresh_gauges().await;
        self.inner.set_state(NodeState::Stopped);

        if timed_out {
            tracing::warn!(timeout = ?SHUTDOWN_TIMEOUT, "background tasks did not stop in time");
            return Err(NodeError::ShutdownTimeout);
        }
        tracing::info!(node = %self.inner.node_id, "node stopped");
        Ok(())
    }

    /// Invoke `method` on a peer that can serve it.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, NodeError> {
        self.inner.call(method, params).await
    }

    /// Flood an event to the mesh. Local listeners see it first.
    pub async fn emit_event(
        &self,
        event_type: &str,
        data: Value,
        class: EventClass,
    ) -> Result<MessageId, NodeError> {
        self.inner.emit_event(event_type, data, class).await
    }

    pub async fn register_handler(&self, method: impl Into<String>, handler: Arc<dyn MethodHandler>) {
        let method = method.into();
        tracing::debug!(method = %method, "handler registered");
        self.inner.handlers.register(method, handler).await;
    }

    pub fn add_event_listener<F>(&self, listener: F)
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(listener);
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Receiver that flips to `true` when the node stops, for collaborator
    /// workers using [`EventBus::wait_for`].
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.subscribe()
    }

    /// Which peer a call to `method` would go to right now.
    pub async fn route(&self, method: &str) -> Option<NodeId> {
        self.inner.routing.read().await.route(method, &HashSet::new())
    }

    pub async fn routing(&self) -> RwLockReadGuard<'_, RoutingTable> {
        self.inner.routing.read().await
    }

    pub async fn peer_count(&self) -> usize {
        self.inner.routing.read().await.peer_count()
    }

    pub async fn neighbors(&self) -> Vec<NodeId> {
        self.inner.neighbors.read().await.ids()
    }

    /// Run one gossip round now. Returns how many neighbors were reached.
    pub async fn gossip_round(&self) -> usize {
        self.inner.gossip_round().await
    }

    /// Run one keep-alive / failure-detection / reconnect pass now.
    pub async fn failure_detection_round(&self) -> FailureReport {
        self.inner.failure_detection_round().await
    }

    pub fn node_id(&self) -> &NodeId {
        &self.inner.node_id
    }

    pub fn state(&self) -> NodeState {
        self.inner.state()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> Arc<NodeMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<NodeInner> {
        &self.inner
    }
}

impl Drop for AgentNode {
    fn drop(&mut self) {
        // Loops hold their own Arc; make sure they end with the handle.
        self.inner.shutdown.shutdown();
    }
}

impl NodeInner {
    // -- State ---------------------------------------------------------------------

    fn state(&self) -> NodeState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, to: NodeState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = to;
    }

    /// Move to `to` if the current state is one of `from`. Returns the
    /// previous state.
    fn transition(
        &self,
        from: &[NodeState],
        to: NodeState,
        action: &'static str,
    ) -> Result<NodeState, NodeError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !from.contains(&*state) {
            return Err(NodeError::InvalidState {
                state: *state,
                action,
            });
        }
        let previous = std::mem::replace(&mut *state, to);
        tracing::debug!(from = %previous, to = %to, "state transition");
        Ok(previous)
    }

    fn ensure_running(&self, action: &'static str) -> Result<(), NodeError> {
        match self.state() {
            NodeState::Running => Ok(()),
            state => Err(NodeError::InvalidState { state, action }),
        }
    }

    // -- Bootstrap -----------------------------------------------------------------

    /// Join every seed, then pick neighbors. Returns how many seeds answered.
    async fn bootstrap(&self) -> usize {
        let seeds = &self.config.bootstrap_peers;
        let own = self.config.advertised_addresses();
        async {
            let mut joined = 0;
            for seed in seeds {
                if *seed == self.config.listen_address || *seed == own.http_address {
                    continue;
                }
                self.metrics.bootstrap_attempts.inc();
                match self.join_seed(seed).await {
                    Ok(peer) => {
                        joined += 1;
                        tracing::info!(seed = %seed, peer = %peer, "joined seed");
                    }
                    Err(e) => tracing::warn!(seed = %seed, error = %e, "seed join failed"),
                }
            }
            if !seeds.is_empty() && joined == 0 {
                tracing::warn!("no seed reachable, will retry");
            }
            self.refill_neighbors().await;
            self.refresh_gauges().await;
            joined
        }
        .instrument(bootstrap_span(seeds.len()))
        .await
    }

    async fn join_seed(&self, seed: &str) -> Result<NodeId, NodeError> {
        let local = self.routing.read().await.local().clone();
        let join = Envelope::join(self.node_id.clone(), &JoinPayload { status: local })?;
        let reply = self.transport.call(seed, join.clone()).await?;
        reply.expect_reply(&join, MessageType::Welcome)?;
        let welcome: WelcomePayload = reply.decode_payload()?;

        let seed_id = welcome.status.node_id().clone();
        let reported = welcome.status.identity.addresses();
        let now = self.clock.now();
        let mut routing = self.routing.write().await;
        if reported.http_address != seed {
            let pair = reported.rebase(seed)?;
            if routing.set_override(seed_id.clone(), pair) {
                tracing::info!(
                    peer = %seed_id,
                    reported = %reported,
                    used = %seed,
                    "seed address override recorded"
                );
            }
        }
        routing.admit(welcome.status, now);
        for peer in welcome.peers {
            routing.merge(peer, now);
        }
        Ok(seed_id)
    }

    // -- Neighbors -----------------------------------------------------------------

    /// Drop neighbors no longer in the table and fill free slots from the
    /// best candidates.
    async fn refill_neighbors(&self) {
        let (dropped, wanted) = {
            let routing = self.routing.read().await;
            let mut neighbors = self.neighbors.write().await;
            let dropped = neighbors.retain(|id| routing.contains(id));
            let current: HashSet<NodeId> = neighbors.ids().into_iter().collect();
            let wanted: Vec<(NodeId, String)> = routing
                .neighbor_candidates(neighbors.free_slots(), &current)
                .into_iter()
                .filter_map(|id| {
                    let addr = routing.address_of(&id)?.stream_address;
                    Some((id, addr))
                })
                .collect();
            (dropped, wanted)
        };

        for (id, addr) in dropped {
            tracing::debug!(peer = %id, "neighbor dropped");
            self.transport.disconnect(&addr).await;
        }
        for (id, addr) in wanted {
            if let Err(e) = self.transport.connect(&addr).await {
                tracing::debug!(peer = %id, addr = %addr, error = %e, "neighbor link failed");
                continue;
            }
            if self.neighbors.write().await.insert(id.clone(), addr.clone()) {
                tracing::debug!(peer = %id, addr = %addr, "neighbor added");
            } else {
                self.transport.disconnect(&addr).await;
            }
        }
    }

    /// Record `peer` as an inbound neighbor. Gossip, events and pings only
    /// travel over neighbor links, so receiving one means the peer holds a
    /// link to this node and expects traffic back over it.
    async fn accept_inbound(&self, peer: &NodeId) {
        if self.neighbors.read().await.contains(peer) {
            return;
        }
        let addr = {
            let routing = self.routing.read().await;
            if !routing.contains(peer) {
                return;
            }
            match routing.address_of(peer) {
                Some(pair) => pair.stream_address,
                None => return,
            }
        };
        let accepted = self
            .neighbors
            .write()
            .await
            .accept(peer.clone(), addr.clone());
        if accepted {
            tracing::debug!(peer = %peer, addr = %addr, "inbound neighbor accepted");
            self.refresh_gauges().await;
        } else {
            tracing::trace!(peer = %peer, "inbound neighbor budget spent");
        }
    }

    async fn refresh_gauges(&self) {
        let (peers, suspects) = {
            let routing = self.routing.read().await;
            (routing.peer_count(), routing.suspect_count())
        };
        let neighbors = self.neighbors.read().await.len();
        self.metrics.peer_count.set(peers as i64);
        self.metrics.suspect_count.set(suspects as i64);
        self.metrics.neighbor_count.set(neighbors as i64);
    }

    /// Send a copy of `envelope` to every address concurrently. Returns how
    /// many sends succeeded; failures are logged and do not affect the rest.
    async fn fan_out(&self, envelope: &Envelope, targets: Vec<(NodeId, String)>) -> usize {
        let sends = targets.iter().map(|(id, addr)| async move {
            let result = self.transport.send(addr, envelope.clone()).await;
            if let Err(e) = &result {
                tracing::debug!(
                    peer = %id,
                    msg_type = %envelope.message_type,
                    error = %e,
                    "neighbor send failed"
                );
            }
            result.is_ok()
        });
        join_all(sends).await.into_iter().filter(|ok| *ok).count()
    }

    // -- Periodic rounds -----------------------------------------------------------

    async fn gossip_round(&self) -> usize {
        let neighbors = self.neighbors.read().await.links();
        let ids: Vec<NodeId> = neighbors.iter().map(|(id, _)| id.clone()).collect();
        let round = {
            let mut routing = self.routing.write().await;
            self.gossip.prepare_round(&mut routing, &ids, self.clock.now())
        };
        let span = gossip_round_span(self.node_id.short(), round.heartbeat_seq);
        async {
            let envelope = match Envelope::gossip(self.node_id.clone(), &round.payload) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to encode gossip");
                    return 0;
                }
            };
            let targets: Vec<(NodeId, String)> = neighbors
                .into_iter()
                .filter(|(id, _)| round.targets.contains(id))
                .collect();
            let reached = self.fan_out(&envelope, targets).await;
            self.metrics.gossip_rounds.inc();
            tracing::trace!(
                peers = round.payload.peers.len(),
                targets = round.targets.len(),
                reached,
                "gossip round"
            );
            reached
        }
        .instrument(span)
        .await
    }

    async fn failure_detection_round(&self) -> FailureReport {
        let span = failure_scan_span(self.node_id.short());
        async {
            // Keep-alive first: a pong touches its sender before the scan.
            let links = self.neighbors.read().await.links();
            join_all(links.iter().map(|(id, addr)| async move {
                if let Err(e) = self.transport.send(addr, Envelope::ping(self.node_id.clone())).await {
                    tracing::debug!(peer = %id, error = %e, "keep-alive failed");
                }
            }))
            .await;

            let report = {
                let now = self.clock.now();
                let mut routing = self.routing.write().await;
                let report = self.gossip.detect_failures(&mut routing, now);
                routing.prune_tombstones(now);
                report
            };
            for peer in &report.suspected {
                tracing::info!(peer = %peer, "peer suspected");
            }
            for peer in &report.evicted {
                tracing::warn!(peer = %peer, "peer declared dead");
            }

            self.refill_neighbors().await;

            let isolated = self.routing.read().await.peer_count() == 0;
            if isolated && !self.config.bootstrap_peers.is_empty() && self.state() == NodeState::Running
            {
                tracing::info!("routing table empty, re-running bootstrap");
                self.bootstrap().await;
            }
            self.refresh_gauges().await;
            report
        }
        .instrument(span)
        .await
    }

    // -- Outbound RPC --------------------------------------------------------------

    async fn call(&self, method: &str, params: Value) -> Result<Value, NodeError> {
        self.ensure_running("call")?;
        let max_attempts = self.config.rpc_max_attempts;
        async {
            let mut excluded = HashSet::new();
            let mut last_error: Option<String> = None;
            for attempt in 1..=max_attempts {
                let target = {
                    let routing = self.routing.read().await;
                    routing.route(method, &excluded).and_then(|id| {
                        let addr = routing.address_of(&id)?.http_address;
                        Some((id, addr))
                    })
                };
                let Some((peer, addr)) = target else {
                    return Err(match last_error {
                        None => NodeError::Routing {
                            method: method.to_string(),
                        },
                        Some(last_error) => NodeError::RetriesExhausted {
                            method: method.to_string(),
                            attempts: attempt - 1,
                            last_error,
                        },
                    });
                };

                self.metrics.rpc_calls.inc();
                let started = Instant::now();
                match self.attempt(&addr, method, params.clone()).await {
                    Ok(value) => {
                        self.metrics
                            .rpc_latency_ms
                            .observe(started.elapsed().as_secs_f64() * 1000.0);
                        return Ok(value);
                    }
                    Err(AttemptError::Remote(error)) => {
                        self.metrics.rpc_failures.inc();
                        return Err(NodeError::Remote {
                            peer,
                            method: method.to_string(),
                            error,
                        });
                    }
                    Err(AttemptError::Retry(reason)) => {
                        self.metrics.rpc_failures.inc();
                        tracing::warn!(peer = %peer, attempt, error = %reason, "call attempt failed");
                        excluded.insert(peer);
                        last_error = Some(reason);
                    }
                }
            }
            Err(NodeError::RetriesExhausted {
                method: method.to_string(),
                attempts: max_attempts,
                last_error: last_error.unwrap_or_default(),
            })
        }
        .instrument(rpc_call_span(method))
        .await
    }

    async fn attempt(&self, addr: &str, method: &str, params: Value) -> Result<Value, AttemptError> {
        let request = Envelope::request(self.node_id.clone(), method, params)
            .map_err(|e| AttemptError::Retry(e.to_string()))?;
        let timeout = self.config.rpc_timeout();
        let reply = match tokio::time::timeout(timeout, self.transport.call(addr, request.clone())).await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => return Err(AttemptError::Retry(e.to_string())),
            Err(_) => {
                return Err(AttemptError::Retry(format!("{addr} timed out after {timeout:?}")))
            }
        };
        reply
            .expect_reply(&request, MessageType::Response)
            .map_err(|e| AttemptError::Retry(e.to_string()))?;
        let response: ResponsePayload = reply
            .decode_payload()
            .map_err(|e| AttemptError::Retry(e.to_string()))?;
        match response.into_result() {
            Ok(value) => Ok(value),
            Err(error) if error.kind == RemoteErrorKind::Dispatch => Err(AttemptError::Remote(error)),
            Err(error) => Err(AttemptError::Retry(error.to_string())),
        }
    }

    // -- Events --------------------------------------------------------------------

    async fn emit_event(
        &self,
        event_type: &str,
        data: Value,
        class: EventClass,
    ) -> Result<MessageId, NodeError> {
        self.ensure_running("emit events")?;
        let ttl = match class {
            EventClass::Domain => self.config.default_event_ttl,
            EventClass::Meta => self.config.meta_event_ttl,
        };
        let payload = EventPayload {
            event_type: event_type.to_string(),
            origin: self.node_id.clone(),
            class,
            data,
        };
        let envelope = Envelope::event(self.node_id.clone(), &payload, ttl)?;
        let message_id = envelope.message_id;

        async {
            // Seen before it leaves, so echoes from neighbors are dropped.
            self.dedup
                .lock()
                .await
                .is_duplicate(message_id, self.clock.now());
            self.metrics.events_emitted.inc();
            self.deliver_locally(&payload);
            let targets = self.neighbors.read().await.links();
            self.fan_out(&envelope, targets).await;
        }
        .instrument(flood_span(event_type, ttl))
        .await;
        Ok(message_id)
    }

    fn deliver_locally(&self, payload: &EventPayload) {
        self.metrics.events_delivered.inc();
        self.events.emit(&payload.event_type, &payload.data);
    }

    // -- Inbound -------------------------------------------------------------------

    async fn on_join(
        &self,
        envelope: &Envelope,
        remote: Option<String>,
    ) -> Result<Envelope, NodeError> {
        let payload: JoinPayload = envelope.decode_payload()?;
        let status = payload.status;
        let joiner = status.node_id().clone();
        let welcome = {
            let mut routing = self.routing.write().await;
            if let Some(remote) = remote {
                let reported = status.identity.addresses();
                let (host, _) = split_host_port(&reported.http_address)?;
                if is_unspecified_host(host) {
                    let (observed, _) = split_host_port(&remote)?;
                    if !is_unspecified_host(observed) {
                        let pair = reported.with_host(observed)?;
                        if routing.set_override(joiner.clone(), pair) {
                            tracing::info!(
                                peer = %joiner,
                                observed = %observed,
                                "joiner address override recorded"
                            );
                        }
                    }
                }
            }
            routing.admit(status, self.clock.now());
            WelcomePayload {
                status: routing.local().clone(),
                peers: routing.snapshot(),
            }
        };
        tracing::info!(peer = %joiner, "peer joined");
        self.accept_inbound(&joiner).await;
        self.refill_neighbors().await;
        self.refresh_gauges().await;
        Ok(Envelope::welcome(self.node_id.clone(), envelope, &welcome)?)
    }

    async fn on_gossip(&self, envelope: &Envelope) -> Result<(), NodeError> {
        let payload: GossipPayload = envelope.decode_payload()?;
        let outcome = {
            let mut routing = self.routing.write().await;
            self.gossip
                .receive(&mut routing, &envelope.sender_id, payload, self.clock.now())
        };
        for peer in &outcome.departed {
            tracing::info!(peer = %peer, "peer departed (via gossip)");
        }
        if outcome.updated > 0 || !outcome.departed.is_empty() {
            self.refill_neighbors().await;
        }
        self.refresh_gauges().await;
        Ok(())
    }

    async fn on_request(&self, envelope: &Envelope) -> Result<Envelope, NodeError> {
        let response = match envelope.decode_payload::<RequestPayload>() {
            Ok(request) => self.handlers.dispatch(request).await,
            Err(e) => ResponsePayload::Error(RemoteError::new(RemoteErrorKind::Protocol, e.to_string())),
        };
        Ok(Envelope::response(self.node_id.clone(), envelope, &response)?)
    }

    async fn on_event(&self, envelope: &Envelope) -> Result<(), NodeError> {
        let payload: EventPayload = envelope.decode_payload()?;
        let duplicate = self
            .dedup
            .lock()
            .await
            .is_duplicate(envelope.message_id, self.clock.now());
        if duplicate {
            tracing::trace!(id = %envelope.message_id, "duplicate event dropped");
            return Ok(());
        }
        async {
            self.deliver_locally(&payload);
            let links = self.neighbors.read().await.links();
            let ids: Vec<NodeId> = links.iter().map(|(id, _)| id.clone()).collect();
            if let Some(plan) = plan_relay(envelope, &self.node_id, &ids) {
                let targets = links
                    .into_iter()
                    .filter(|(id, _)| plan.targets.contains(id))
                    .collect();
                self.fan_out(&plan.envelope, targets).await;
            }
        }
        .instrument(flood_span(&payload.event_type, envelope.ttl))
        .await;
        Ok(())
    }

    async fn on_leave(&self, envelope: &Envelope) -> Result<(), NodeError> {
        let payload: LeavePayload = envelope.decode_payload()?;
        let node_id = payload.node_id;
        let evicted = self
            .routing
            .write()
            .await
            .depart(&node_id, payload.heartbeat_seq, self.clock.now());
        if evicted {
            tracing::info!(peer = %node_id, "peer left");
            self.refill_neighbors().await;
            self.refresh_gauges().await;
        }
        Ok(())
    }

    async fn announce_leave(&self) {
        let heartbeat_seq = self.routing.write().await.bump_heartbeat();
        let payload = LeavePayload {
            node_id: self.node_id.clone(),
            heartbeat_seq,
        };
        match Envelope::leave(self.node_id.clone(), &payload) {
            Ok(envelope) => {
                let targets = self.neighbors.read().await.links();
                let reached = self.fan_out(&envelope, targets).await;
                tracing::debug!(reached, "leave announced");
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode leave"),
        }
    }

    async fn dispatch(&self, envelope: Envelope, remote: Option<String>) -> Result<Option<Envelope>, NodeError> {
        if envelope.message_type != MessageType::Join {
            // Any direct contact counts as proof of life.
            self.routing
                .write()
                .await
                .touch(&envelope.sender_id, self.clock.now());
        }
        let sender = envelope.sender_id.clone();
        let over_link = matches!(
            envelope.message_type,
            MessageType::Gossip | MessageType::Event | MessageType::Ping
        );
        let reply = match envelope.message_type {
            MessageType::Join => self.on_join(&envelope, remote).await.map(Some),
            MessageType::Gossip => self.on_gossip(&envelope).await.map(|()| None),
            MessageType::Request => self.on_request(&envelope).await.map(Some),
            MessageType::Event => self.on_event(&envelope).await.map(|()| None),
            MessageType::Ping => Ok(Some(Envelope::pong(self.node_id.clone(), &envelope))),
            MessageType::Pong => Ok(None),
            MessageType::Leave => self.on_leave(&envelope).await.map(|()| None),
            MessageType::Welcome | MessageType::Response => {
                tracing::debug!(id = %envelope.message_id, "unsolicited reply dropped");
                self.metrics.envelopes_dropped.inc();
                Ok(None)
            }
        }?;
        if over_link {
            self.accept_inbound(&sender).await;
        }
        Ok(reply)
    }
}

#[async_trait]
impl EnvelopeHandler for NodeInner {
    async fn handle(&self, envelope: Envelope, remote: Option<String>) -> Option<Envelope> {
        if matches!(self.state(), NodeState::New | NodeState::Stopped)
            || envelope.sender_id == self.node_id
        {
            self.metrics.envelopes_dropped.inc();
            return None;
        }
        self.metrics.envelopes_received.inc();
        let span = dispatch_span(envelope.sender_id.short(), envelope.message_type.as_str());
        let message_type = envelope.message_type;
        match self.dispatch(envelope, remote).instrument(span).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(msg_type = %message_type, error = %e, "inbound envelope rejected");
                self.metrics.envelopes_dropped.inc();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentmesh_nullables::{MemoryNetwork, NullClock};
    use agentmesh_types::{AddressPair, Timestamp};

    fn node(network: &MemoryNetwork, addr: &str, caps: &[&str]) -> AgentNode {
        let config = NodeConfig::new(addr, caps.iter().copied());
        AgentNode::with_clock(config, network.endpoint(), Arc::new(NullClock::at_secs(1_000)))
            .unwrap()
    }

    #[test]
    fn state_display_is_lowercase() {
        assert_eq!(NodeState::Bootstrapping.to_string(), "bootstrapping");
        assert_eq!(NodeState::Stopped.as_str(), "stopped");
    }

    #[tokio::test]
    async fn lifecycle_moves_forward_only() {
        let network = MemoryNetwork::new();
        let mut node = node(&network, "A:9000", &["storage-access"]);
        assert_eq!(node.state(), NodeState::New);

        node.start().await.unwrap();
        assert_eq!(node.state(), NodeState::Running);
        assert!(matches!(
            node.start().await,
            Err(NodeError::InvalidState {
                state: NodeState::Running,
                ..
            })
        ));

        node.stop().await.unwrap();
        assert_eq!(node.state(), NodeState::Stopped);
        assert!(!network.is_registered("A:9000"));
        assert!(matches!(node.stop().await, Err(NodeError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn call_and_emit_require_running() {
        let network = MemoryNetwork::new();
        let node = node(&network, "A:9000", &[]);
        assert!(matches!(
            node.call("observe", Value::Null).await,
            Err(NodeError::InvalidState {
                state: NodeState::New,
                ..
            })
        ));
        assert!(node
            .emit_event("x", Value::Null, EventClass::Domain)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn unspecified_joiner_gets_observed_host() {
        let network = MemoryNetwork::new();
        let mut seed = node(&network, "A:9000", &["storage-access"]);
        seed.start().await.unwrap();

        let joiner = NodeId::generate();
        let identity = PeerIdentity::new(
            joiner.clone(),
            agentmesh_types::CapabilitySet::from_static(&["inference-logic"]),
            AddressPair::same("0.0.0.0:9100"),
            Timestamp::from_secs(1),
        );
        let status = PeerStatus::new_alive(identity, 1, Timestamp::from_secs(1));
        let join = Envelope::join(joiner.clone(), &JoinPayload { status }).unwrap();

        let reply = seed
            .inner()
            .handle(join.clone(), Some("10.1.2.3:55012".to_string()))
            .await
            .expect("join must be answered");
        reply.expect_reply(&join, MessageType::Welcome).unwrap();

        let routing = seed.routing().await;
        assert_eq!(
            routing.address_of(&joiner),
            Some(AddressPair::same("10.1.2.3:9100"))
        );
        assert_eq!(
            routing.get(&joiner).unwrap().identity.http_address(),
            "10.1.2.3:9100"
        );
    }

    #[tokio::test]
    async fn own_envelopes_are_dropped() {
        let network = MemoryNetwork::new();
        let mut node = node(&network, "A:9000", &[]);
        node.start().await.unwrap();
        let ping = Envelope::ping(node.node_id().clone());
        assert!(node.inner().handle(ping, None).await.is_none());
        assert_eq!(node.metrics().envelopes_dropped.get(), 1);
    }
}
