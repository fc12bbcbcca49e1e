use std::time::Duration;

use agentmesh_messages::MessageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("peer at {0} is unreachable")]
    Unreachable(String),

    #[error("no reply from {addr} within {after:?}")]
    Timeout { addr: String, after: Duration },

    #[error("transport failure talking to {addr}: {reason}")]
    Transport { addr: String, reason: String },

    #[error("protocol error: {0}")]
    Protocol(#[from] MessageError),

    #[error("transport is shut down")]
    Shutdown,
}

impl NetworkError {
    /// Whether another peer might succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Shutdown)
    }
}
