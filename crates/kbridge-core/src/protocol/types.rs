//! Message types for the kernel wire protocol.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Jupyter messaging protocol version stamped on outgoing headers.
pub const PROTOCOL_VERSION: &str = "5.3";

/// Logical kernel socket a message travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Requests and their synchronous replies.
    Shell,
    /// Broadcast output (streams, display data, comm traffic, status).
    #[serde(rename = "iopub")]
    IoPub,
    Control,
    Stdin,
}

impl Channel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Shell => "shell",
            Self::IoPub => "iopub",
            Self::Control => "control",
            Self::Stdin => "stdin",
        }
    }
}

/// Message header. Also used as the correlation (`parent_header`) of replies
/// and relayed output.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Header {
    pub msg_id: String,
    pub session: String,
    pub username: String,
    pub msg_type: String,
    pub version: String,
}

impl Header {
    /// Fresh header with a random message id.
    pub fn new(msg_type: impl Into<String>, session: impl Into<String>) -> Self {
        Self {
            msg_id: uuid::Uuid::new_v4().to_string(),
            session: session.into(),
            username: "kbridge".to_string(),
            msg_type: msg_type.into(),
            version: PROTOCOL_VERSION.to_string(),
        }
    }
}

/// One framed message as it crosses the process boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub channel: Channel,
    pub header: Header,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub parent_header: Option<Header>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub buffers: Vec<Vec<u8>>,
}

impl WireMessage {
    /// Build a message on `channel` with an empty parent and metadata.
    pub fn new(channel: Channel, header: Header, content: Value) -> Self {
        Self {
            channel,
            header,
            parent_header: None,
            metadata: Map::new(),
            content,
            buffers: Vec::new(),
        }
    }

    pub fn msg_type(&self) -> &str {
        &self.header.msg_type
    }

    /// `content.comm_id`, if the message belongs to a comm.
    pub fn comm_id(&self) -> Option<&str> {
        self.content.get("comm_id").and_then(Value::as_str)
    }

    /// Message id of the request this message answers.
    pub fn parent_msg_id(&self) -> Option<&str> {
        self.parent_header
            .as_ref()
            .map(|h| h.msg_id.as_str())
            .filter(|id| !id.is_empty())
    }
}

/// Jupyter encodes "no parent" as `{}`; treat that, `null` and a missing
/// field alike.
fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<Header>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) if map.is_empty() => Ok(None),
        Some(other) => serde_json::from_value(other)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Content of an `execute_request`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
    pub silent: bool,
    pub store_history: bool,
    pub user_expressions: Map<String, Value>,
    pub allow_stdin: bool,
    pub stop_on_error: bool,
}

impl ExecuteRequest {
    pub fn new(code: impl Into<String>, allow_stdin: bool) -> Self {
        Self {
            code: code.into(),
            silent: false,
            store_history: true,
            user_expressions: Map::new(),
            allow_stdin,
            stop_on_error: true,
        }
    }
}

/// Well-known message type names.
pub mod msg_type {
    pub const EXECUTE_REQUEST: &str = "execute_request";
    pub const EXECUTE_REPLY: &str = "execute_reply";
    pub const KERNEL_INFO_REQUEST: &str = "kernel_info_request";
    pub const KERNEL_INFO_REPLY: &str = "kernel_info_reply";
    pub const COMM_OPEN: &str = "comm_open";
    pub const COMM_MSG: &str = "comm_msg";
    pub const COMM_CLOSE: &str = "comm_close";
    pub const STATUS: &str = "status";
}
