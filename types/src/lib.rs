//! Fundamental types for the AgentMesh substrate.
//!
//! This crate defines the core types shared across every other crate in the
//! workspace: node ids, capability tags, peer identities and statuses,
//! addresses and timestamps.

pub mod address;
pub mod capability;
pub mod error;
pub mod node_id;
pub mod peer;
pub mod time;

pub use address::{is_unspecified_host, split_host_port, AddressPair};
pub use capability::{Capability, CapabilitySet};
pub use error::TypesError;
pub use node_id::NodeId;
pub use peer::{Liveness, PeerIdentity, PeerStatus, PROTOCOL_VERSION};
pub use time::Timestamp;
