//! Engine trait and the types that cross it.

use std::future::Future;
use std::time::Duration;

use serde_json::{Map, Value};

use kbridge_core::protocol::{Header, WireMessage};

/// An external execution engine (kernel) the session talks to.
///
/// Implementations own the process and the message transport. The
/// [`EngineHandle`](super::EngineHandle) layers lifecycle state,
/// readiness and reply correlation on top.
pub trait ExecutionEngine: Send {
    /// Runtime-name tag, e.g. `groovy`.
    fn runtime_name(&self) -> &str;

    /// Feature flags, queried once before readiness is awaited.
    fn capabilities(&self) -> EngineCapabilities;

    /// Spawn the engine and open its channels.
    fn start(&mut self) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Send one message to the engine.
    fn send(&mut self, message: WireMessage) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Next message from the shell channel. `None` waits without a deadline.
    fn recv_reply(
        &mut self,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<WireMessage, EngineError>> + Send;

    /// Next output event, or `Ok(None)` if nothing arrives within `timeout`.
    fn recv_output(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<OutputEvent>, EngineError>> + Send;

    /// Close the channels and kill the process without negotiation.
    fn terminate(&mut self) -> impl Future<Output = Result<(), EngineError>> + Send;
}

/// What an engine can do, decided once per start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineCapabilities {
    /// Engine answers `kernel_info_request`, so readiness can be probed.
    pub kernel_info: bool,
}

impl Default for EngineCapabilities {
    fn default() -> Self {
        Self { kernel_info: true }
    }
}

/// One message drained from the engine's output channel.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputEvent {
    pub msg_type: String,
    pub content: Value,
    pub metadata: Map<String, Value>,
    /// Correlation header as the engine set it.
    pub parent_header: Option<Header>,
    /// `content.comm_id`, when the event belongs to a comm.
    pub comm_id: Option<String>,
    pub buffers: Vec<Vec<u8>>,
}

impl From<WireMessage> for OutputEvent {
    fn from(message: WireMessage) -> Self {
        let comm_id = message.comm_id().map(String::from);
        Self {
            msg_type: message.header.msg_type,
            content: message.content,
            metadata: message.metadata,
            parent_header: message.parent_header,
            comm_id,
            buffers: message.buffers,
        }
    }
}

/// Errors from engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Failed to spawn {runtime} kernel: {reason}")]
    SpawnFailed { runtime: String, reason: String },

    #[error("{runtime} kernel did not become ready within {waited:?}")]
    Startup { runtime: String, waited: Duration },

    #[error("{runtime} kernel is unavailable: {reason}")]
    Unavailable { runtime: String, reason: String },

    #[error("No reply from {runtime} kernel within {waited:?}")]
    ReplyTimeout { runtime: String, waited: Duration },

    #[error("{runtime} kernel has been stopped")]
    Stopped { runtime: String },

    #[error("Wire error: {0}")]
    Wire(#[from] kbridge_core::Error),
}

impl EngineError {
    /// Whether the engine is gone for good (process dead or handle stopped).
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Stopped { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbridge_core::protocol::Channel;
    use serde_json::json;

    #[test]
    fn output_event_takes_comm_id_from_content() {
        let mut msg = WireMessage::new(
            Channel::IoPub,
            Header::new("comm_open", "k"),
            json!({"comm_id": "abc123", "target_name": "jupyter.widget"}),
        );
        msg.buffers.push(vec![1, 2, 3]);
        msg.metadata.insert("version".into(), json!("2.0"));

        let event = OutputEvent::from(msg);
        assert_eq!(event.msg_type, "comm_open");
        assert_eq!(event.comm_id.as_deref(), Some("abc123"));
        assert_eq!(event.buffers, vec![vec![1, 2, 3]]);
        assert_eq!(event.metadata["version"], "2.0");
    }

    #[test]
    fn plain_output_has_no_comm_id() {
        let msg = WireMessage::new(
            Channel::IoPub,
            Header::new("stream", "k"),
            json!({"name": "stdout", "text": "4\n"}),
        );
        assert!(OutputEvent::from(msg).comm_id.is_none());
    }

    #[test]
    fn fatal_errors() {
        let gone = EngineError::Unavailable {
            runtime: "groovy".into(),
            reason: "exited".into(),
        };
        let slow = EngineError::ReplyTimeout {
            runtime: "groovy".into(),
            waited: Duration::from_secs(1),
        };
        assert!(gone.is_fatal());
        assert!(!slow.is_fatal());
    }
}
