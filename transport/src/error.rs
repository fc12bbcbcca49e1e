use std::time::Duration;

use agentmesh_messages::MessageError;
use agentmesh_network::NetworkError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot connect to {0}")]
    Unreachable(String),

    #[error("request to {addr} timed out after {after:?}")]
    Timeout { addr: String, after: Duration },

    #[error("{addr} answered HTTP {status}")]
    Status { addr: String, status: u16 },

    #[error("request to {addr} failed: {reason}")]
    Request { addr: String, reason: String },

    #[error("stream link to {addr} failed: {reason}")]
    Link { addr: String, reason: String },

    #[error(transparent)]
    Message(#[from] MessageError),
}

impl From<TransportError> for NetworkError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unreachable(addr) => NetworkError::Unreachable(addr),
            TransportError::Timeout { addr, after } => NetworkError::Timeout { addr, after },
            TransportError::Message(e) => NetworkError::Protocol(e),
            TransportError::Bind { addr, source } => NetworkError::Transport {
                addr,
                reason: source.to_string(),
            },
            TransportError::Status { addr, status } => NetworkError::Transport {
                addr,
                reason: format!("HTTP {status}"),
            },
            TransportError::Request { addr, reason } | TransportError::Link { addr, reason } => {
                NetworkError::Transport { addr, reason }
            }
        }
    }
}
