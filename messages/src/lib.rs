//! Wire messages exchanged between AgentMesh nodes.
//!
//! Every exchange is an [`Envelope`] whose payload is a JSON value. The
//! membership payloads (join, welcome, gossip, leave) have typed views in
//! [`payload`]; request params, results and event data are opaque to the
//! substrate.

pub mod envelope;
pub mod error;
pub mod payload;

pub use envelope::{Envelope, MessageId, MessageType};
pub use error::MessageError;
pub use payload::{
    Departure, EventClass, EventPayload, GossipPayload, JoinPayload, LeavePayload,
    RemoteError, RemoteErrorKind, RequestPayload, ResponsePayload, WelcomePayload,
    DEFAULT_EVENT_TTL, META_EVENT_TTL,
};
