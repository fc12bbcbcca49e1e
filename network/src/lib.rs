//! Network logic for AgentMesh nodes.
//!
//! Membership (routing table, tombstones, address overrides), capability
//! routing, gossip dissemination with failure detection, event dedup and
//! flood relay planning. Nothing here touches a socket; the wire is behind
//! the [`Transport`] trait.

pub mod clock;
pub mod dedup;
pub mod error;
pub mod flood;
pub mod gossip;
pub mod method_table;
pub mod overrides;
pub mod routing_table;
pub mod transport;

pub use clock::{Clock, SystemClock};
pub use dedup::{EventDedup, DEFAULT_DEDUP_CAPACITY, DEFAULT_DEDUP_TTL};
pub use error::NetworkError;
pub use flood::{plan_relay, RelayPlan};
pub use gossip::{
    expected_rounds, select_targets, FailureReport, GossipConfig, GossipEngine, GossipOutcome,
    GossipRound, DEFAULT_FANOUT,
};
pub use method_table::MethodTable;
pub use overrides::AddressOverrides;
pub use routing_table::{EvictionCause, RoutingTable, Tombstone, DEFAULT_TOMBSTONE_TTL};
pub use transport::{EnvelopeHandler, Transport};
