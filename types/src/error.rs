//! Error type for constructing and parsing substrate types.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypesError {
    #[error("capability tag must be non-empty and contain no whitespace: {0:?}")]
    InvalidCapability(String),

    #[error("node id must be non-empty")]
    EmptyNodeId,

    #[error("invalid address {0:?}: expected host:port")]
    InvalidAddress(String),
}
