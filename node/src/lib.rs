//! AgentMesh node runtime.
//!
//! An [`AgentNode`] is one member of the mesh. It:
//! - Joins the mesh through seed peers and keeps a routing table current by gossip
//! - Detects failed peers and evicts them, reconnecting when it ends up alone
//! - Routes outbound calls to a peer holding the required capabilities
//! - Dispatches inbound requests to handlers registered by collaborators
//! - Floods events to its neighbors with a bounded hop count
//!
//! The wire is behind [`agentmesh_network::Transport`]; the daemon plugs in
//! the HTTP/WebSocket transport, tests plug in an in-memory one.

pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod neighbors;
pub mod node;
pub mod shutdown;
pub mod tracing_spans;

pub use config::NodeConfig;
pub use error::NodeError;
pub use events::{DeliveredEvent, EventBus, Wake};
pub use handlers::{handler_fn, HandlerRegistry, MethodHandler};
pub use logging::{init_logging, LogFormat};
pub use metrics::NodeMetrics;
pub use neighbors::{LinkDirection, NeighborSet, DEFAULT_MAX_NEIGHBORS};
pub use node::{AgentNode, NodeState};
pub use shutdown::{wait_for_shutdown, ShutdownController};
