use thiserror::Error;

use crate::MessageType;

/// Failure to build or interpret an envelope. Always a protocol failure
/// from the substrate's point of view.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("failed to encode {message_type} payload: {source}")]
    Encode {
        message_type: MessageType,
        #[source]
        source: serde_json::Error,
    },

    #[error("payload does not match message type {message_type}: {source}")]
    Payload {
        message_type: MessageType,
        #[source]
        source: serde_json::Error,
    },

    #[error("expected {expected} envelope, got {actual}")]
    UnexpectedType {
        expected: MessageType,
        actual: MessageType,
    },

    #[error("reply is not correlated with message {expected}")]
    Uncorrelated { expected: crate::MessageId },
}
