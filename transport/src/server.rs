//! Inbound HTTP and WebSocket endpoints.
//!
//! - `POST /envelope` accepts a JSON envelope and answers with the reply
//!   envelope, or `204 No Content` when there is none.
//! - `GET /stream` upgrades to a WebSocket carrying JSON envelopes in text
//!   frames. Replies go back on the same socket.
//! - `GET /health` answers `200 OK` with an empty body.
//! - `GET /metrics` serves the attached metrics renderer, if any.

use agentmesh_messages::Envelope;
use agentmesh_network::EnvelopeHandler;
use axum::{
    body::Bytes,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{ConnectInfo, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::TransportError;

/// Produces the Prometheus text exposition for `GET /metrics`.
pub type MetricsRenderer = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Clone)]
struct ServerState {
    handler: Weak<dyn EnvelopeHandler>,
    metrics: Option<MetricsRenderer>,
}

impl ServerState {
    fn handler(&self) -> Option<Arc<dyn EnvelopeHandler>> {
        self.handler.upgrade()
    }
}

/// A running server. Dropping the handle does not stop it; call
/// [`ServerHandle::shutdown`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.task.await {
            warn!("server task ended abnormally: {e}");
        }
    }
}

pub fn router(handler: Weak<dyn EnvelopeHandler>, metrics: Option<MetricsRenderer>) -> Router {
    Router::new()
        .route("/envelope", post(envelope_handler))
        .route("/stream", get(stream_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(ServerState { handler, metrics })
}

/// Bind `listen_address` and serve until [`ServerHandle::shutdown`].
pub async fn serve(
    listen_address: &str,
    handler: Weak<dyn EnvelopeHandler>,
    metrics: Option<MetricsRenderer>,
) -> Result<ServerHandle, TransportError> {
    let listener = tokio::net::TcpListener::bind(listen_address)
        .await
        .map_err(|source| TransportError::Bind {
            addr: listen_address.to_string(),
            source,
        })?;
    let local_addr = listener
        .local_addr()
        .map_err(|source| TransportError::Bind {
            addr: listen_address.to_string(),
            source,
        })?;
    info!(%local_addr, "listening for envelopes");

    let app = router(handler, metrics);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .await;
        if let Err(e) = result {
            warn!("server error: {e}");
        }
    });

    Ok(ServerHandle {
        local_addr,
        shutdown_tx: Some(shutdown_tx),
        task,
    })
}

async fn envelope_handler(
    State(state): State<ServerState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Response {
    let envelope = match Envelope::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!(%remote, "rejecting malformed envelope: {e}");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };
    let Some(handler) = state.handler() else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    match handler.handle(envelope, Some(remote.to_string())).await {
        Some(reply) => Json(reply).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, remote))
}

async fn health_handler() -> StatusCode {
    StatusCode::OK
}

async fn metrics_handler(State(state): State<ServerState>) -> Response {
    match &state.metrics {
        Some(render) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Serve one inbound stream link until the peer closes it.
async fn handle_socket(socket: WebSocket, state: ServerState, remote: SocketAddr) {
    let (mut sender, mut receiver) = socket.split();
    debug!(%remote, "inbound stream link open");

    while let Some(frame) = receiver.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(%remote, "stream receive error: {e}");
                break;
            }
        };
        let envelope = match Envelope::from_json(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(%remote, "dropping malformed frame: {e}");
                continue;
            }
        };
        let Some(handler) = state.handler() else {
            break;
        };
        let Some(reply) = handler.handle(envelope, Some(remote.to_string())).await else {
            continue;
        };
        match reply.to_json() {
            Ok(json) => {
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!(%remote, "failed to encode reply: {e}"),
        }
    }
    debug!(%remote, "inbound stream link closed");
}
