//! Link registry: persistent outbound WebSocket links keyed by stream
//! address.
//!
//! Each link owns a writer task draining an unbounded channel into the
//! socket and a reader task handing inbound frames (pongs and other
//! replies) to the local handler. Replies the handler produces go back out
//! on the same link.

use agentmesh_messages::Envelope;
use agentmesh_network::EnvelopeHandler;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::TransportError;

/// How long to wait for the WebSocket handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// The handler inbound link frames are delivered to. Filled in by `listen`.
pub(crate) type HandlerSlot = Arc<RwLock<Option<Weak<dyn EnvelopeHandler>>>>;

pub(crate) fn current_handler(slot: &HandlerSlot) -> Option<Arc<dyn EnvelopeHandler>> {
    let guard = slot.read().ok()?;
    let handler = guard.as_ref().and_then(|weak| weak.upgrade());
    handler
}

struct Link {
    outbound: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Link {
    fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    fn close(self) {
        let _ = self.outbound.send(Message::Close(None));
        self.reader.abort();
        // The writer exits after flushing the close frame.
        drop(self.writer);
    }
}

pub struct LinkRegistry {
    links: Mutex<HashMap<String, Link>>,
    handler: HandlerSlot,
}

impl LinkRegistry {
    pub(crate) fn new(handler: HandlerSlot) -> Self {
        Self {
            links: Mutex::new(HashMap::new()),
            handler,
        }
    }

    /// Open a link to `addr` unless an open one already exists.
    pub async fn connect(&self, addr: &str) -> Result<(), TransportError> {
        self.sender_for(addr).await.map(|_| ())
    }

    /// Queue `envelope` on the link to `addr`, opening it if needed. A link
    /// found dead is replaced once before giving up.
    pub async fn send(&self, addr: &str, envelope: &Envelope) -> Result<(), TransportError> {
        let text = envelope.to_json()?;
        for _ in 0..2 {
            let sender = self.sender_for(addr).await?;
            if sender.send(Message::Text(text.clone())).is_ok() {
                return Ok(());
            }
            self.disconnect(addr).await;
        }
        Err(TransportError::Link {
            addr: addr.to_string(),
            reason: "link closed".to_string(),
        })
    }

    pub async fn disconnect(&self, addr: &str) {
        if let Some(link) = self.links.lock().await.remove(addr) {
            link.close();
        }
    }

    pub async fn close_all(&self) {
        let drained: Vec<Link> = self.links.lock().await.drain().map(|(_, l)| l).collect();
        for link in drained {
            link.close();
        }
    }

    /// Addresses with an open link.
    pub async fn open_links(&self) -> Vec<String> {
        self.links
            .lock()
            .await
            .iter()
            .filter(|(_, l)| l.is_open())
            .map(|(addr, _)| addr.clone())
            .collect()
    }

    async fn sender_for(&self, addr: &str) -> Result<mpsc::UnboundedSender<Message>, TransportError> {
        {
            let mut links = self.links.lock().await;
            if let Some(link) = links.get(addr) {
                if link.is_open() {
                    return Ok(link.outbound.clone());
                }
            }
            if let Some(stale) = links.remove(addr) {
                stale.close();
            }
        }

        let link = open_link(addr, self.handler.clone()).await?;
        let mut links = self.links.lock().await;
        // Another caller may have opened a link during the handshake.
        if let Some(existing) = links.get(addr) {
            if existing.is_open() {
                let sender = existing.outbound.clone();
                link.close();
                return Ok(sender);
            }
        }
        let sender = link.outbound.clone();
        if let Some(stale) = links.insert(addr.to_string(), link) {
            stale.close();
        }
        Ok(sender)
    }
}

async fn open_link(addr: &str, handler: HandlerSlot) -> Result<Link, TransportError> {
    let url = format!("ws://{addr}/stream");
    let (socket, _) = tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(url))
        .await
        .map_err(|_| TransportError::Timeout {
            addr: addr.to_string(),
            after: CONNECT_TIMEOUT,
        })?
        .map_err(|e| {
            debug!(%addr, "stream connect failed: {e}");
            TransportError::Unreachable(addr.to_string())
        })?;
    debug!(%addr, "stream link open");

    let (mut sink, mut stream) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sink.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    let replies = outbound.clone();
    let remote = addr.to_string();
    let reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!(addr = %remote, "stream link read error: {e}");
                    break;
                }
            };
            let envelope = match Envelope::from_json(&text) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(addr = %remote, "dropping malformed frame: {e}");
                    continue;
                }
            };
            let Some(handler) = current_handler(&handler) else {
                break;
            };
            if let Some(reply) = handler.handle(envelope, Some(remote.clone())).await {
                match reply.to_json() {
                    Ok(json) => {
                        let _ = replies.send(Message::Text(json));
                    }
                    Err(e) => warn!(addr = %remote, "failed to encode reply: {e}"),
                }
            }
        }
        // Tell the writer to stop so the link reads as closed.
        let _ = replies.send(Message::Close(None));
    });

    Ok(Link {
        outbound,
        reader,
        writer,
    })
}
