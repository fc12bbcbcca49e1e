//! Two transports talking over real localhost sockets.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use agentmesh_messages::{Envelope, MessageType};
use agentmesh_network::{EnvelopeHandler, NetworkError, Transport};
use agentmesh_transport::HttpTransport;
use agentmesh_types::NodeId;
use async_trait::async_trait;

fn node(id: &str) -> NodeId {
    id.parse().unwrap()
}

/// Answers pings with pongs and records everything else.
#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<Envelope>>,
}

impl Recorder {
    fn count(&self, message_type: MessageType) -> usize {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.message_type == message_type)
            .count()
    }
}

#[async_trait]
impl EnvelopeHandler for Recorder {
    async fn handle(&self, envelope: Envelope, _remote: Option<String>) -> Option<Envelope> {
        let reply = (envelope.message_type == MessageType::Ping)
            .then(|| Envelope::pong(node("recorder"), &envelope));
        self.seen.lock().unwrap().push(envelope);
        reply
    }
}

async fn start() -> (HttpTransport, Arc<Recorder>, String) {
    let transport = HttpTransport::new().with_metrics(Arc::new(|| "up 1\n".to_string()));
    let recorder = Arc::new(Recorder::default());
    let handler: Weak<dyn EnvelopeHandler> = Arc::downgrade(&recorder) as _;
    transport.listen("127.0.0.1:0", handler).await.unwrap();
    let addr = transport.local_addr().await.unwrap().to_string();
    (transport, recorder, addr)
}

async fn wait_for(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

#[tokio::test]
async fn health_endpoint_answers_ok() {
    let (transport, _recorder, addr) = start().await;
    assert!(transport.client().health(&addr).await.unwrap());
    transport.shutdown().await;
}

#[tokio::test]
async fn call_returns_reply_envelope() {
    let (server, recorder, addr) = start().await;
    let client = HttpTransport::new();
    let ping = Envelope::ping(node("caller"));
    let reply = client.call(&addr, ping.clone()).await.unwrap();
    assert_eq!(reply.message_type, MessageType::Pong);
    assert_eq!(reply.in_reply_to, Some(ping.message_id));
    assert_eq!(recorder.count(MessageType::Ping), 1);
    server.shutdown().await;
}

#[tokio::test]
async fn call_without_reply_is_transport_error() {
    let (server, recorder, addr) = start().await;
    let client = HttpTransport::new();
    let gossip = Envelope::new(MessageType::Gossip, node("caller"), serde_json::Value::Null);
    let err = client.call(&addr, gossip).await.unwrap_err();
    assert!(matches!(err, NetworkError::Transport { .. }));
    assert_eq!(recorder.count(MessageType::Gossip), 1);
    server.shutdown().await;
}

#[tokio::test]
async fn stream_reply_reaches_local_handler() {
    let (a, a_recorder, _a_addr) = start().await;
    let (b, b_recorder, b_addr) = start().await;

    a.connect(&b_addr).await.unwrap();
    assert_eq!(a.open_links().await, vec![b_addr.clone()]);
    a.send(&b_addr, Envelope::ping(node("a"))).await.unwrap();

    assert!(wait_for(|| b_recorder.count(MessageType::Ping) == 1).await);
    assert!(wait_for(|| a_recorder.count(MessageType::Pong) == 1).await);

    a.disconnect(&b_addr).await;
    assert!(a.open_links().await.is_empty());
    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn unreachable_peer_is_reported() {
    let client = HttpTransport::with_request_timeout(Duration::from_secs(2));
    let err = client
        .call("127.0.0.1:1", Envelope::ping(node("a")))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        NetworkError::Unreachable(_) | NetworkError::Timeout { .. }
    ));
    assert!(client.send("127.0.0.1:1", Envelope::ping(node("a"))).await.is_err());
}

#[tokio::test]
async fn malformed_body_is_rejected_and_metrics_are_served() {
    let (server, recorder, addr) = start().await;
    let http = reqwest::Client::new();

    let response = http
        .post(format!("http://{addr}/envelope"))
        .body("{not an envelope")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    assert!(recorder.seen.lock().unwrap().is_empty());

    let metrics = http
        .get(format!("http://{addr}/metrics"))
        .send()
        .await
        .unwrap();
    assert_eq!(metrics.status().as_u16(), 200);
    assert_eq!(metrics.text().await.unwrap(), "up 1\n");
    server.shutdown().await;
}
