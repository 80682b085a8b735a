//! Client-facing channels the relay publishes to.

use std::io::Write;
use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::relay::ClientMessage;

/// Destination for relayed kernel output and user-visible notices.
pub trait ClientChannel: Send + Sync {
    /// Publish one relayed message.
    fn publish(&self, message: ClientMessage);

    /// Show a short user-visible line (e.g. the startup confirmation).
    fn notice(&self, text: &str);
}

/// What a [`BroadcastChannel`] subscriber receives.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Message(ClientMessage),
    Notice(String),
}

/// Fans relayed output out to any number of subscribers.
pub struct BroadcastChannel {
    event_tx: broadcast::Sender<ClientEvent>,
}

impl BroadcastChannel {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity);
        Self { event_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.event_tx.subscribe()
    }

    fn send(&self, event: ClientEvent) {
        if let Ok(count) = self.event_tx.send(event) {
            debug!(receivers = count, "Client event broadcast");
        } else {
            debug!("No receivers for client event");
        }
    }
}

impl Default for BroadcastChannel {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ClientChannel for BroadcastChannel {
    fn publish(&self, message: ClientMessage) {
        self.send(ClientEvent::Message(message));
    }

    fn notice(&self, text: &str) {
        self.send(ClientEvent::Notice(text.to_string()));
    }
}

/// Writes relayed messages as JSON lines to `out` and notices as plain
/// lines to `notices`. Used by the `kbridge` binary with stdout/stderr.
pub struct JsonLinesChannel<W, N> {
    out: Mutex<W>,
    notices: Mutex<N>,
}

impl<W: Write + Send, N: Write + Send> JsonLinesChannel<W, N> {
    pub const fn new(out: W, notices: N) -> Self {
        Self {
            out: Mutex::new(out),
            notices: Mutex::new(notices),
        }
    }

    /// Recover the writers.
    pub fn into_inner(self) -> (W, N) {
        (
            self.out.into_inner().unwrap_or_else(std::sync::PoisonError::into_inner),
            self.notices
                .into_inner()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        )
    }
}

fn write_line<T: Write>(writer: &Mutex<T>, line: &str) -> std::io::Result<()> {
    let mut writer = writer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()
}

impl<W: Write + Send, N: Write + Send> ClientChannel for JsonLinesChannel<W, N> {
    fn publish(&self, message: ClientMessage) {
        let line = match serde_json::to_string(&message) {
            Ok(line) => line,
            Err(e) => {
                warn!(msg_type = %message.msg_type, error = %e, "Failed to serialize client message");
                return;
            }
        };
        if let Err(e) = write_line(&self.out, &line) {
            warn!(error = %e, "Failed to write client message");
        }
    }

    fn notice(&self, text: &str) {
        if let Err(e) = write_line(&self.notices, text) {
            warn!(error = %e, "Failed to write notice");
        }
    }
}
