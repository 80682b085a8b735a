//! Test doubles: a scripted in-memory engine and a recording channel.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{Map, Value, json};

use kbridge_core::protocol::{Channel, Header, WireMessage, msg_type};

use crate::channel::ClientChannel;
use crate::engine::{EngineCapabilities, EngineError, ExecutionEngine, OutputEvent};
use crate::relay::ClientMessage;

#[derive(Default)]
struct Script {
    running: bool,
    alive: bool,
    starts: usize,
    terminations: usize,
    sent: Vec<WireMessage>,
    replies: VecDeque<WireMessage>,
    outputs: VecDeque<OutputEvent>,
    execute_batches: VecDeque<Vec<OutputEvent>>,
    comm_batches: VecDeque<Vec<OutputEvent>>,
    startup_output: Vec<OutputEvent>,
    answer_kernel_info: bool,
    withhold_replies: usize,
    fail_start: bool,
    fail_terminate: bool,
}

fn lock(script: &Mutex<Script>) -> MutexGuard<'_, Script> {
    script.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory engine that answers requests from a script.
///
/// Every `execute_request` gets an `execute_reply` and queues the next
/// execute batch as output; every other shell message queues the next comm
/// batch. Queued output is attributed to the request that caused it.
/// `kernel_info_request` is answered unless disabled.
pub struct ScriptedEngine {
    runtime: String,
    capabilities: EngineCapabilities,
    script: Arc<Mutex<Script>>,
}

/// Inspects a [`ScriptedEngine`] after it has moved into a session.
#[derive(Clone)]
pub struct EngineProbe {
    script: Arc<Mutex<Script>>,
}

impl ScriptedEngine {
    pub fn new(runtime: &str) -> (Self, EngineProbe) {
        let script = Arc::new(Mutex::new(Script {
            answer_kernel_info: true,
            ..Script::default()
        }));
        let engine = Self {
            runtime: runtime.to_string(),
            capabilities: EngineCapabilities::default(),
            script: Arc::clone(&script),
        };
        (engine, EngineProbe { script })
    }

    /// Queue the output produced by the next `execute_request`.
    #[must_use]
    pub fn with_execute_output(self, events: Vec<OutputEvent>) -> Self {
        lock(&self.script).execute_batches.push_back(events);
        self
    }

    /// Queue the output produced by the next non-execute shell message.
    #[must_use]
    pub fn with_comm_output(self, events: Vec<OutputEvent>) -> Self {
        lock(&self.script).comm_batches.push_back(events);
        self
    }

    /// Output already pending when the engine starts.
    #[must_use]
    pub fn with_startup_output(self, events: Vec<OutputEvent>) -> Self {
        lock(&self.script).startup_output = events;
        self
    }

    /// Advertise no `kernel_info` support.
    #[must_use]
    pub fn without_kernel_info(mut self) -> Self {
        self.capabilities.kernel_info = false;
        self
    }

    /// Advertise `kernel_info` support but never answer it.
    #[must_use]
    pub fn ignoring_kernel_info(self) -> Self {
        lock(&self.script).answer_kernel_info = false;
        self
    }

    /// Leave the next `count` execute requests unanswered. Their output
    /// is still queued.
    #[must_use]
    pub fn withholding_replies(self, count: usize) -> Self {
        lock(&self.script).withhold_replies = count;
        self
    }

    /// Make `start` fail.
    #[must_use]
    pub fn failing_start(self) -> Self {
        lock(&self.script).fail_start = true;
        self
    }

    /// Make `terminate` fail once a process is running.
    #[must_use]
    pub fn failing_terminate(self) -> Self {
        lock(&self.script).fail_terminate = true;
        self
    }

    fn unavailable(&self, reason: &str) -> EngineError {
        EngineError::Unavailable {
            runtime: self.runtime.clone(),
            reason: reason.to_string(),
        }
    }
}

impl EngineProbe {
    /// Number of processes started.
    pub fn starts(&self) -> usize {
        lock(&self.script).starts
    }

    /// Number of processes terminated.
    pub fn terminations(&self) -> usize {
        lock(&self.script).terminations
    }

    /// Every message sent to the engine.
    pub fn sent(&self) -> Vec<WireMessage> {
        lock(&self.script).sent.clone()
    }

    /// Messages sent to the engine of the given type.
    pub fn sent_of_type(&self, kind: &str) -> Vec<WireMessage> {
        lock(&self.script)
            .sent
            .iter()
            .filter(|m| m.msg_type() == kind)
            .cloned()
            .collect()
    }

    /// Simulate the process dying. Already queued output is still readable.
    pub fn kill(&self) {
        lock(&self.script).alive = false;
    }

    /// Push output as if the kernel printed it now.
    pub fn emit(&self, event: OutputEvent) {
        lock(&self.script).outputs.push_back(event);
    }

    /// Queue a shell reply ahead of whatever the script answers next.
    pub fn push_reply(&self, reply: WireMessage) {
        lock(&self.script).replies.push_back(reply);
    }
}

impl ExecutionEngine for ScriptedEngine {
    fn runtime_name(&self) -> &str {
        &self.runtime
    }

    fn capabilities(&self) -> EngineCapabilities {
        self.capabilities
    }

    async fn start(&mut self) -> Result<(), EngineError> {
        let mut script = lock(&self.script);
        if script.fail_start {
            return Err(EngineError::SpawnFailed {
                runtime: self.runtime.clone(),
                reason: "scripted failure".to_string(),
            });
        }
        script.starts += 1;
        script.running = true;
        script.alive = true;
        let startup = script.startup_output.drain(..).collect::<Vec<_>>();
        script.outputs.extend(startup);
        Ok(())
    }

    async fn send(&mut self, message: WireMessage) -> Result<(), EngineError> {
        let mut script = lock(&self.script);
        if !script.running || !script.alive {
            drop(script);
            return Err(self.unavailable("kernel not running"));
        }
        let kind = message.msg_type().to_string();
        match kind.as_str() {
            msg_type::KERNEL_INFO_REQUEST => {
                if script.answer_kernel_info {
                    script.replies.push_back(reply_to(
                        &message,
                        msg_type::KERNEL_INFO_REPLY,
                        json!({"status": "ok", "implementation": "scripted"}),
                    ));
                }
            }
            msg_type::EXECUTE_REQUEST => {
                if script.withhold_replies > 0 {
                    script.withhold_replies -= 1;
                } else {
                    script.replies.push_back(reply_to(
                        &message,
                        msg_type::EXECUTE_REPLY,
                        json!({"status": "ok", "execution_count": 1}),
                    ));
                }
                let batch = script.execute_batches.pop_front().unwrap_or_default();
                script.outputs.extend(caused_by(&message, batch));
            }
            _ => {
                let batch = script.comm_batches.pop_front().unwrap_or_default();
                script.outputs.extend(caused_by(&message, batch));
            }
        }
        script.sent.push(message);
        Ok(())
    }

    async fn recv_reply(&mut self, timeout: Option<Duration>) -> Result<WireMessage, EngineError> {
        let next = {
            let mut script = lock(&self.script);
            if let Some(reply) = script.replies.pop_front() {
                return Ok(reply);
            }
            script.alive
        };
        match (next, timeout) {
            (false, _) => Err(self.unavailable("kernel exited")),
            (true, Some(waited)) => {
                tokio::time::sleep(waited).await;
                Err(EngineError::ReplyTimeout {
                    runtime: self.runtime.clone(),
                    waited,
                })
            }
            (true, None) => Err(self.unavailable("no scripted reply")),
        }
    }

    async fn recv_output(&mut self, _timeout: Duration) -> Result<Option<OutputEvent>, EngineError> {
        let mut script = lock(&self.script);
        if let Some(event) = script.outputs.pop_front() {
            return Ok(Some(event));
        }
        if script.alive {
            Ok(None)
        } else {
            drop(script);
            Err(self.unavailable("kernel exited"))
        }
    }

    async fn terminate(&mut self) -> Result<(), EngineError> {
        let mut script = lock(&self.script);
        if !script.running {
            return Ok(());
        }
        script.running = false;
        script.alive = false;
        if script.fail_terminate {
            drop(script);
            return Err(self.unavailable("scripted terminate failure"));
        }
        script.terminations += 1;
        Ok(())
    }
}

fn reply_to(request: &WireMessage, kind: &str, content: Value) -> WireMessage {
    let mut reply = WireMessage::new(
        Channel::Shell,
        Header::new(kind, &request.header.session),
        content,
    );
    reply.parent_header = Some(request.header.clone());
    reply
}

fn caused_by(request: &WireMessage, batch: Vec<OutputEvent>) -> Vec<OutputEvent> {
    batch
        .into_iter()
        .map(|mut event| {
            event.parent_header = Some(request.header.clone());
            event
        })
        .collect()
}

fn event(kind: &str, content: Value) -> OutputEvent {
    let comm_id = content
        .get("comm_id")
        .and_then(Value::as_str)
        .map(String::from);
    OutputEvent {
        msg_type: kind.to_string(),
        content,
        metadata: Map::new(),
        parent_header: Some(Header::new(msg_type::EXECUTE_REQUEST, "kernel")),
        comm_id,
        buffers: Vec::new(),
    }
}

/// `stream` output on `name` (stdout/stderr).
pub fn stream(name: &str, text: &str) -> OutputEvent {
    event("stream", json!({"name": name, "text": text}))
}

/// `execute_result` with a plain-text representation.
pub fn execute_result(text: &str) -> OutputEvent {
    event(
        "execute_result",
        json!({"execution_count": 1, "data": {"text/plain": text}, "metadata": {}}),
    )
}

/// `status` output.
pub fn status(state: &str) -> OutputEvent {
    event(msg_type::STATUS, json!({"execution_state": state}))
}

/// `comm_open` for a widget with the given comm id.
pub fn comm_open(comm_id: &str) -> OutputEvent {
    event(
        msg_type::COMM_OPEN,
        json!({"comm_id": comm_id, "target_name": "jupyter.widget", "data": {}}),
    )
}

/// `comm_close` for the given comm id.
pub fn comm_close(comm_id: &str) -> OutputEvent {
    event(msg_type::COMM_CLOSE, json!({"comm_id": comm_id, "data": {}}))
}

/// `comm_msg` carrying `data` for the given comm id.
pub fn comm_msg(comm_id: &str, data: Value) -> OutputEvent {
    event(msg_type::COMM_MSG, json!({"comm_id": comm_id, "data": data}))
}

/// Collects everything published to it.
#[derive(Clone, Default)]
pub struct RecordingChannel {
    messages: Arc<Mutex<Vec<ClientMessage>>>,
    notices: Arc<Mutex<Vec<String>>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<ClientMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn message_types(&self) -> Vec<String> {
        self.messages().into_iter().map(|m| m.msg_type).collect()
    }

    pub fn notices(&self) -> Vec<String> {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ClientChannel for RecordingChannel {
    fn publish(&self, message: ClientMessage) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }

    fn notice(&self, text: &str) {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text.to_string());
    }
}
