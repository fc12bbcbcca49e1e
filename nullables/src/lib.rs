//! Nullable infrastructure for deterministic testing.
//!
//! The node reaches the outside world only through the [`Clock`] and
//! [`Transport`] traits. This crate provides test-friendly implementations
//! that:
//! - Only advance time when told to
//! - Deliver envelopes in-process, inline, with controllable partitions
//! - Never touch a socket
//!
//! Usage: swap real implementations for nullables in tests.
//!
//! [`Clock`]: agentmesh_network::Clock
//! [`Transport`]: agentmesh_network::Transport

pub mod clock;
pub mod handler;
pub mod network;

pub use clock::NullClock;
pub use handler::NullHandler;
pub use network::{Delivery, MemoryNetwork, MemoryTransport};
