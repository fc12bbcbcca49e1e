use agentmesh_messages::{MessageError, RemoteError};
use agentmesh_network::NetworkError;
use agentmesh_types::{NodeId, TypesError};
use thiserror::Error;

use crate::node::NodeState;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("protocol error: {0}")]
    Protocol(#[from] MessageError),

    #[error("no alive peer can serve method {method}")]
    Routing { method: String },

    #[error("peer {peer} failed {method}: {error}")]
    Remote {
        peer: NodeId,
        method: String,
        error: RemoteError,
    },

    #[error("{method} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        method: String,
        attempts: u32,
        last_error: String,
    },

    #[error("cannot {action} while {state}")]
    InvalidState {
        state: NodeState,
        action: &'static str,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid value: {0}")]
    Types(#[from] TypesError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("shutdown timeout")]
    ShutdownTimeout,
}
