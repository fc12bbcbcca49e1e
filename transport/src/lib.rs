//! Wire transport for AgentMesh.
//!
//! Request/response envelopes travel as JSON over `POST /envelope`
//! (reqwest client, axum server). Gossip, events and keep-alives travel over
//! persistent WebSocket links to `GET /stream` (tokio-tungstenite client,
//! axum server).

pub mod client;
pub mod error;
pub mod http;
pub mod links;
pub mod server;

pub use client::EnvelopeClient;
pub use error::TransportError;
pub use http::HttpTransport;
pub use links::LinkRegistry;
pub use server::{router, serve, MetricsRenderer, ServerHandle};
