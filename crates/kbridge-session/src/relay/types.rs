//! Relay module types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use kbridge_core::protocol::Header;

use crate::engine::OutputEvent;

/// A kernel event as published to the client.
///
/// Identical to the kernel's event except for `parent_header`, which is the
/// current client request, and `identity`, which is the event's comm id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    pub msg_type: String,
    pub content: Value,
    pub metadata: Map<String, Value>,
    pub parent_header: Option<Header>,
    pub identity: Option<String>,
    pub buffers: Vec<Vec<u8>>,
}

impl ClientMessage {
    pub fn relayed(event: OutputEvent, parent: Option<&Header>) -> Self {
        Self {
            msg_type: event.msg_type,
            content: event.content,
            metadata: event.metadata,
            parent_header: parent.cloned(),
            identity: event.comm_id,
            buffers: event.buffers,
        }
    }
}

/// Follow-up message from the client, e.g. a widget callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub msg_type: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub comm_id: Option<String>,
}

impl InboundMessage {
    pub fn new(msg_type: impl Into<String>, content: Value) -> Self {
        Self {
            msg_type: msg_type.into(),
            content,
            comm_id: None,
        }
    }

    /// Target comm: `content.comm_id`, else the envelope's `comm_id`.
    pub fn target_comm_id(&self) -> Option<&str> {
        self.content
            .get("comm_id")
            .and_then(Value::as_str)
            .or(self.comm_id.as_deref())
    }
}

/// What one drain pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Events republished to the client.
    pub relayed: usize,
    /// Comm ids registered during the pass.
    pub new_comms: usize,
}

/// What happened to a routed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Sent to the kernel, followed by a drain.
    Forwarded { comm_id: String, drained: DrainSummary },
    /// Target comm unknown; nothing was sent.
    Dropped { comm_id: Option<String> },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_comm_id_wins() {
        let mut msg = InboundMessage::new("comm_msg", json!({"comm_id": "abc123", "data": {}}));
        msg.comm_id = Some("other".into());
        assert_eq!(msg.target_comm_id(), Some("abc123"));
    }

    #[test]
    fn envelope_comm_id_is_fallback() {
        let mut msg = InboundMessage::new("comm_msg", json!({"data": {}}));
        assert_eq!(msg.target_comm_id(), None);
        msg.comm_id = Some("abc123".into());
        assert_eq!(msg.target_comm_id(), Some("abc123"));
    }

    #[test]
    fn inbound_deserializes_without_optional_fields() {
        let msg: InboundMessage = serde_json::from_str(r#"{"msg_type":"comm_msg"}"#).unwrap();
        assert_eq!(msg.content, Value::Null);
        assert!(msg.comm_id.is_none());
    }

    #[test]
    fn relayed_substitutes_parent_and_identity() {
        let event = OutputEvent {
            msg_type: "comm_open".into(),
            content: json!({"comm_id": "abc123"}),
            metadata: Map::new(),
            parent_header: Some(Header::new("execute_request", "kernel-side")),
            comm_id: Some("abc123".into()),
            buffers: vec![vec![7]],
        };
        let client_parent = Header::new("execute_request", "client-side");

        let msg = ClientMessage::relayed(event, Some(&client_parent));
        assert_eq!(msg.parent_header.as_ref(), Some(&client_parent));
        assert_eq!(msg.identity.as_deref(), Some("abc123"));
        assert_eq!(msg.buffers, vec![vec![7]]);
    }
}
