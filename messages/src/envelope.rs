use agentmesh_types::NodeId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::payload::{
    EventPayload, GossipPayload, JoinPayload, LeavePayload, RequestPayload, ResponsePayload,
    WelcomePayload,
};
use crate::MessageError;

/// Unique id of a single send. Relayed events keep the id of the original
/// emission so duplicates can be suppressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for MessageId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Join,
    Welcome,
    Gossip,
    Request,
    Response,
    Event,
    Ping,
    Pong,
    Leave,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Welcome => "welcome",
            Self::Gossip => "gossip",
            Self::Request => "request",
            Self::Response => "response",
            Self::Event => "event",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Leave => "leave",
        }
    }

    /// Replies carry `in_reply_to` pointing at the envelope that solicited them.
    pub fn is_reply(&self) -> bool {
        matches!(self, Self::Welcome | Self::Response | Self::Pong)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of every exchange between two nodes.
///
/// `payload` stays an opaque JSON value until a receiver asks for a typed
/// view through [`Envelope::decode_payload`]. `ttl` is only meaningful for
/// events and is zero everywhere else.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: MessageId,
    pub message_type: MessageType,
    pub sender_id: NodeId,
    #[serde(default)]
    pub ttl: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<MessageId>,
    #[serde(default)]
    pub payload: Value,
}

fn encode<T: Serialize>(message_type: MessageType, payload: &T) -> Result<Value, MessageError> {
    serde_json::to_value(payload).map_err(|source| MessageError::Encode {
        message_type,
        source,
    })
}

impl Envelope {
    pub fn new(message_type: MessageType, sender_id: NodeId, payload: Value) -> Self {
        Self {
            message_id: MessageId::generate(),
            message_type,
            sender_id,
            ttl: 0,
            in_reply_to: None,
            payload,
        }
    }

    fn typed<T: Serialize>(
        message_type: MessageType,
        sender_id: NodeId,
        payload: &T,
    ) -> Result<Self, MessageError> {
        Ok(Self::new(
            message_type,
            sender_id,
            encode(message_type, payload)?,
        ))
    }

    fn reply_to(mut self, request: &Envelope) -> Self {
        self.in_reply_to = Some(request.message_id);
        self
    }

    pub fn join(sender_id: NodeId, payload: &JoinPayload) -> Result<Self, MessageError> {
        Self::typed(MessageType::Join, sender_id, payload)
    }

    pub fn welcome(
        sender_id: NodeId,
        join: &Envelope,
        payload: &WelcomePayload,
    ) -> Result<Self, MessageError> {
        Ok(Self::typed(MessageType::Welcome, sender_id, payload)?.reply_to(join))
    }

    pub fn gossip(sender_id: NodeId, payload: &GossipPayload) -> Result<Self, MessageError> {
        Self::typed(MessageType::Gossip, sender_id, payload)
    }

    pub fn request(
        sender_id: NodeId,
        method: impl Into<String>,
        params: Value,
    ) -> Result<Self, MessageError> {
        let payload = RequestPayload {
            method: method.into(),
            params,
        };
        Self::typed(MessageType::Request, sender_id, &payload)
    }

    pub fn response(
        sender_id: NodeId,
        request: &Envelope,
        payload: &ResponsePayload,
    ) -> Result<Self, MessageError> {
        Ok(Self::typed(MessageType::Response, sender_id, payload)?.reply_to(request))
    }

    pub fn event(
        sender_id: NodeId,
        payload: &EventPayload,
        ttl: u8,
    ) -> Result<Self, MessageError> {
        let mut envelope = Self::typed(MessageType::Event, sender_id, payload)?;
        envelope.ttl = ttl;
        Ok(envelope)
    }

    pub fn ping(sender_id: NodeId) -> Self {
        Self::new(MessageType::Ping, sender_id, Value::Null)
    }

    pub fn pong(sender_id: NodeId, ping: &Envelope) -> Self {
        Self::new(MessageType::Pong, sender_id, Value::Null).reply_to(ping)
    }

    pub fn leave(sender_id: NodeId, payload: &LeavePayload) -> Result<Self, MessageError> {
        Self::typed(MessageType::Leave, sender_id, payload)
    }

    /// Copy of an event for the next hop: same id and payload, new sender,
    /// decremented budget.
    pub fn relayed(&self, relay_id: NodeId, ttl: u8) -> Self {
        Self {
            sender_id: relay_id,
            ttl,
            ..self.clone()
        }
    }

    /// Typed view of the payload. A mismatch is a protocol failure.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, MessageError> {
        T::deserialize(&self.payload).map_err(|source| MessageError::Payload {
            message_type: self.message_type,
            source,
        })
    }

    pub fn expect_type(&self, expected: MessageType) -> Result<(), MessageError> {
        if self.message_type == expected {
            Ok(())
        } else {
            Err(MessageError::UnexpectedType {
                expected,
                actual: self.message_type,
            })
        }
    }

    /// Checks that this envelope is a reply of type `expected` to `request`.
    pub fn expect_reply(&self, request: &Envelope, expected: MessageType) -> Result<(), MessageError> {
        self.expect_type(expected)?;
        if self.in_reply_to == Some(request.message_id) {
            Ok(())
        } else {
            Err(MessageError::Uncorrelated {
                expected: request.message_id,
            })
        }
    }

    pub fn to_json(&self) -> Result<String, MessageError> {
        serde_json::to_string(self).map_err(|source| MessageError::Encode {
            message_type: self.message_type,
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, MessageError> {
        serde_json::from_str(text).map_err(MessageError::Malformed)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, MessageError> {
        serde_json::from_slice(bytes).map_err(MessageError::Malformed)
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} from {}",
            self.message_type,
            self.message_id,
            self.sender_id.short()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{EventClass, RemoteError, RemoteErrorKind};
    use serde_json::json;

    fn node(id: &str) -> NodeId {
        id.parse().unwrap()
    }

    #[test]
    fn message_ids_are_unique() {
        let a = Envelope::ping(node("a"));
        let b = Envelope::ping(node("a"));
        assert_ne!(a.message_id, b.message_id);
        assert_eq!(a.ttl, 0);
    }

    #[test]
    fn response_correlates_with_request() {
        let request = Envelope::request(node("b"), "observe", json!({"s": 1})).unwrap();
        let reply = Envelope::response(
            node("a"),
            &request,
            &ResponsePayload::Result(json!("ok")),
        )
        .unwrap();
        assert!(reply.expect_reply(&request, MessageType::Response).is_ok());

        let other = Envelope::request(node("b"), "observe", Value::Null).unwrap();
        assert!(matches!(
            reply.expect_reply(&other, MessageType::Response),
            Err(MessageError::Uncorrelated { .. })
        ));
        assert!(matches!(
            reply.expect_reply(&request, MessageType::Welcome),
            Err(MessageError::UnexpectedType { .. })
        ));
    }

    #[test]
    fn decode_payload_rejects_mismatched_shape() {
        let request = Envelope::request(node("b"), "observe", json!([1, 2])).unwrap();
        let decoded: RequestPayload = request.decode_payload().unwrap();
        assert_eq!(decoded.method, "observe");
        assert_eq!(decoded.params, json!([1, 2]));

        let ping = Envelope::ping(node("b"));
        let err = ping.decode_payload::<GossipPayload>().unwrap_err();
        assert!(matches!(
            err,
            MessageError::Payload {
                message_type: MessageType::Ping,
                ..
            }
        ));
    }

    #[test]
    fn relayed_event_keeps_identity() {
        let payload = EventPayload {
            event_type: "fact_added".into(),
            origin: node("a"),
            class: EventClass::Domain,
            data: json!({"k": "v"}),
        };
        let event = Envelope::event(node("a"), &payload, 3).unwrap();
        let hop = event.relayed(node("b"), 2);
        assert_eq!(hop.message_id, event.message_id);
        assert_eq!(hop.payload, event.payload);
        assert_eq!(hop.sender_id, node("b"));
        assert_eq!(hop.ttl, 2);
    }

    #[test]
    fn wire_format_is_snake_case_json() {
        let ping = Envelope::ping(node("a"));
        let pong = Envelope::pong(node("b"), &ping);
        let text = pong.to_json().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["message_type"], "pong");
        assert_eq!(value["sender_id"], "b");
        assert_eq!(value["in_reply_to"], json!(ping.message_id.to_string()));
        assert_eq!(Envelope::from_json(&text).unwrap(), pong);
    }

    #[test]
    fn ping_omits_reply_field() {
        let value = serde_json::to_value(Envelope::ping(node("a"))).unwrap();
        assert!(value.get("in_reply_to").is_none());
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            Envelope::from_json("{not json"),
            Err(MessageError::Malformed(_))
        ));
        assert!(matches!(
            Envelope::from_slice(br#"{"message_type":"ping"}"#),
            Err(MessageError::Malformed(_))
        ));
    }

    #[test]
    fn error_response_roundtrips_through_envelope() {
        let request = Envelope::request(node("b"), "infer", Value::Null).unwrap();
        let outcome = ResponsePayload::Error(RemoteError::new(
            RemoteErrorKind::CapabilityMismatch,
            "no handler for infer",
        ));
        let reply = Envelope::response(node("a"), &request, &outcome).unwrap();
        let decoded: ResponsePayload = reply.decode_payload().unwrap();
        assert_eq!(decoded, outcome);
    }
}
