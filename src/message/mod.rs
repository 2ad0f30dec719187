//! Wire messages exchanged between channel instances.

pub mod types;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use self::types::{RequestId, ResponseFault};
use crate::codec::Codec;
use crate::error::{ChannelError, Result};

/// Tagged union of everything that travels over a broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Event {
        action: String,
        #[serde(default)]
        payload: Value,
    },
    #[serde(rename_all = "camelCase")]
    Request {
        request_id: RequestId,
        action: String,
        #[serde(default)]
        payload: Value,
    },
    #[serde(rename_all = "camelCase")]
    Response {
        request_id: RequestId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ResponseFault>,
    },
}

impl Message {
    pub fn event(action: impl Into<String>, payload: Value) -> Self {
        Message::Event {
            action: action.into(),
            payload,
        }
    }

    pub fn request(request_id: RequestId, action: impl Into<String>, payload: Value) -> Self {
        Message::Request {
            request_id,
            action: action.into(),
            payload,
        }
    }

    pub fn reply(request_id: RequestId, result: Value) -> Self {
        Message::Response {
            request_id,
            result: Some(result),
            error: None,
        }
    }

    pub fn fault(request_id: RequestId, fault: ResponseFault) -> Self {
        Message::Response {
            request_id,
            result: None,
            error: Some(fault),
        }
    }

    pub fn encode<C: Codec>(&self, codec: &C) -> Result<Bytes> {
        Ok(Bytes::from(codec.encode(self)?))
    }

    /// Decode a frame. Anything that is not one of the three known shapes is a protocol fault.
    pub fn decode<C: Codec>(codec: &C, frame: &[u8]) -> Result<Self> {
        codec
            .decode(frame)
            .map_err(|e| ChannelError::Protocol(format!("Undecodable message: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use serde_json::json;

    #[test]
    fn test_event_wire_format() {
        let msg = Message::event("statusChanged", json!("active"));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"type": "event", "action": "statusChanged", "payload": "active"})
        );
    }

    #[test]
    fn test_request_wire_format() {
        let id = RequestId::from_raw("abc123");
        let msg = Message::request(id, "sum", json!({"a": 2, "b": 3}));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "request",
                "requestId": "abc123",
                "action": "sum",
                "payload": {"a": 2, "b": 3}
            })
        );
    }

    #[test]
    fn test_response_without_result() {
        let frame = br#"{"type":"response","requestId":"r1"}"#;
        let msg = Message::decode(&JsonCodec, frame).unwrap();
        assert_eq!(
            msg,
            Message::Response {
                request_id: RequestId::from_raw("r1"),
                result: None,
                error: None,
            }
        );
    }

    #[test]
    fn test_response_fault_wire_format() {
        let msg = Message::fault(
            RequestId::from_raw("r2"),
            ResponseFault::Handler {
                message: "boom".into(),
            },
        );
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "response",
                "requestId": "r2",
                "error": {"kind": "handler", "message": "boom"}
            })
        );

        let bytes = msg.encode(&JsonCodec).unwrap();
        assert_eq!(Message::decode(&JsonCodec, &bytes).unwrap(), msg);
    }

    #[test]
    fn test_event_without_payload() {
        let msg = Message::decode(&JsonCodec, br#"{"type":"event","action":"ping"}"#).unwrap();
        assert_eq!(msg, Message::event("ping", Value::Null));
    }

    #[test]
    fn test_unknown_type_is_protocol_fault() {
        let err = Message::decode(&JsonCodec, br#"{"type":"gossip","action":"x"}"#).unwrap_err();
        assert!(matches!(err, ChannelError::Protocol(_)));

        let err = Message::decode(&JsonCodec, br#"{"action":"x"}"#).unwrap_err();
        assert!(matches!(err, ChannelError::Protocol(_)));
    }
}
