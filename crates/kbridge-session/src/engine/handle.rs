//! Lifecycle wrapper around one execution engine.
//!
//! ```text
//! NotStarted → Starting → Running → Stopped
//!     ↑            │
//!     └── failed ──┘
//! ```
//! `Stopped` is terminal: a new handle is needed to run code again.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use kbridge_core::config::{ReadinessMode, SessionConfig};
use kbridge_core::protocol::{Channel, ExecuteRequest, Header, WireMessage, msg_type};

use super::readiness::{Readiness, ReadinessStrategy};
use super::types::{EngineError, ExecutionEngine, OutputEvent};

/// Lifecycle state of an engine handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    NotStarted,
    Starting,
    Running,
    Stopped,
}

/// Result of [`EngineHandle::ensure_started`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    AlreadyRunning,
    Started(Readiness),
}

/// Owns one engine and drives it through its lifecycle.
pub struct EngineHandle<E> {
    engine: E,
    state: EngineState,
    /// Session id stamped on every request header.
    session_id: String,
    readiness: ReadinessMode,
    config: SessionConfig,
    /// `msg_id` of the most recent execute request.
    last_request: Option<String>,
    /// Requests given up on; their late output is dropped.
    abandoned: HashSet<String>,
}

impl<E: ExecutionEngine> EngineHandle<E> {
    pub fn new(engine: E, config: SessionConfig) -> Self {
        Self {
            engine,
            state: EngineState::NotStarted,
            session_id: uuid::Uuid::new_v4().to_string(),
            readiness: config.readiness,
            config,
            last_request: None,
            abandoned: HashSet::new(),
        }
    }

    pub const fn state(&self) -> EngineState {
        self.state
    }

    pub const fn is_running(&self) -> bool {
        matches!(self.state, EngineState::Running)
    }

    pub fn runtime_name(&self) -> &str {
        self.engine.runtime_name()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub const fn engine(&self) -> &E {
        &self.engine
    }

    /// Start the engine unless it is already running.
    ///
    /// A failed start terminates whatever was spawned and leaves the handle
    /// in `NotStarted`, so the next call retries.
    pub async fn ensure_started(&mut self) -> Result<StartOutcome, EngineError> {
        match self.state {
            EngineState::Running => return Ok(StartOutcome::AlreadyRunning),
            EngineState::Stopped => return Err(self.stopped()),
            EngineState::NotStarted | EngineState::Starting => {}
        }

        self.state = EngineState::Starting;
        let strategy =
            ReadinessStrategy::select(self.readiness, self.engine.capabilities(), &self.config);
        info!(
            runtime = self.engine.runtime_name(),
            ?strategy,
            "Starting kernel"
        );

        let started = match self.engine.start().await {
            Ok(()) => strategy.wait(&mut self.engine, &self.session_id).await,
            Err(e) => Err(e),
        };

        match started {
            Ok(readiness) => {
                self.discard_startup_output().await;
                self.state = EngineState::Running;
                info!(runtime = self.engine.runtime_name(), ?readiness, "Kernel ready");
                Ok(StartOutcome::Started(readiness))
            }
            Err(e) => {
                warn!(runtime = self.engine.runtime_name(), error = %e, "Kernel failed to start");
                if let Err(term) = self.engine.terminate().await {
                    debug!(error = %term, "Terminate after failed start");
                }
                self.state = EngineState::NotStarted;
                Err(e)
            }
        }
    }

    /// Close channels and kill the engine. Returns `true` if a process was
    /// terminated by this call; repeated calls are no-ops.
    pub async fn stop(&mut self) -> Result<bool, EngineError> {
        match self.state {
            EngineState::Stopped => Ok(false),
            EngineState::NotStarted => {
                self.state = EngineState::Stopped;
                Ok(false)
            }
            EngineState::Starting | EngineState::Running => {
                self.state = EngineState::Stopped;
                self.engine.terminate().await?;
                info!(runtime = self.engine.runtime_name(), "Kernel stopped");
                Ok(true)
            }
        }
    }

    /// Send `code` as an `execute_request` and block until its shell reply.
    pub async fn submit(&mut self, code: &str) -> Result<WireMessage, EngineError> {
        self.ensure_started().await?;

        let content = serde_json::to_value(ExecuteRequest::new(code, self.config.allow_stdin))
            .map_err(kbridge_core::Error::from)?;
        let header = Header::new(msg_type::EXECUTE_REQUEST, &self.session_id);
        let msg_id = header.msg_id.clone();
        self.last_request = Some(msg_id.clone());

        let sent = self
            .engine
            .send(WireMessage::new(Channel::Shell, header, content))
            .await;
        self.check(sent).await?;
        debug!(msg_id = %msg_id, "Execute request sent");

        let reply = await_reply(&mut self.engine, &msg_id, self.config.reply_timeout()).await;
        let reply = self.check(reply).await?;
        debug!(
            msg_id = %msg_id,
            status = ?reply.content.get("status"),
            "Execute reply received"
        );
        Ok(reply)
    }

    /// Send a message of `kind` with `content` on the shell channel.
    pub async fn send(&mut self, kind: &str, content: Value) -> Result<(), EngineError> {
        if !self.is_running() {
            return Err(self.not_running());
        }
        let header = Header::new(kind, &self.session_id);
        let sent = self
            .engine
            .send(WireMessage::new(Channel::Shell, header, content))
            .await;
        self.check(sent).await
    }

    /// Next output event, `Ok(None)` once `timeout` passes quietly.
    ///
    /// Output attributed to an abandoned request is skipped.
    pub async fn next_output(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<OutputEvent>, EngineError> {
        if !self.is_running() {
            return Err(self.not_running());
        }
        loop {
            let event = self.engine.recv_output(timeout).await;
            let event = self.check(event).await?;
            match event {
                Some(event) if self.is_abandoned(&event) => {
                    debug!(
                        msg_type = %event.msg_type,
                        "Dropping output of an abandoned request"
                    );
                }
                other => return Ok(other),
            }
        }
    }

    /// Give up on the most recent execute request: output still arriving
    /// for it is no longer relayed. Call once its pending output has been
    /// drained.
    pub fn abandon_last_request(&mut self) {
        if let Some(msg_id) = self.last_request.take() {
            debug!(msg_id = %msg_id, "Abandoning request");
            self.abandoned.insert(msg_id);
        }
    }

    fn is_abandoned(&self, event: &OutputEvent) -> bool {
        event
            .parent_header
            .as_ref()
            .is_some_and(|parent| self.abandoned.contains(&parent.msg_id))
    }

    /// Startup status chatter is not part of any cell's output.
    async fn discard_startup_output(&mut self) {
        let mut discarded = 0usize;
        while let Ok(Some(_)) = self.engine.recv_output(Duration::ZERO).await {
            discarded += 1;
        }
        if discarded > 0 {
            debug!(discarded, "Discarded startup output");
        }
    }

    /// A dead engine stops the handle; what is left of the process is reaped.
    async fn check<T>(&mut self, result: Result<T, EngineError>) -> Result<T, EngineError> {
        if let Err(EngineError::Unavailable { runtime, reason }) = &result {
            warn!(runtime = %runtime, reason = %reason, "Kernel went away; handle stopped");
            self.state = EngineState::Stopped;
            if let Err(e) = self.engine.terminate().await {
                debug!(error = %e, "Reaping dead kernel");
            }
        }
        result
    }

    fn stopped(&self) -> EngineError {
        EngineError::Stopped {
            runtime: self.engine.runtime_name().to_string(),
        }
    }

    fn not_running(&self) -> EngineError {
        match self.state {
            EngineState::Stopped => self.stopped(),
            _ => EngineError::Unavailable {
                runtime: self.engine.runtime_name().to_string(),
                reason: "kernel not started".to_string(),
            },
        }
    }
}

/// Wait for the shell reply whose parent is `msg_id`, skipping stale ones.
pub(super) async fn await_reply<E: ExecutionEngine>(
    engine: &mut E,
    msg_id: &str,
    timeout: Option<Duration>,
) -> Result<WireMessage, EngineError> {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        let reply = match engine.recv_reply(remaining).await {
            Ok(reply) => reply,
            Err(EngineError::ReplyTimeout { runtime, .. }) => {
                return Err(EngineError::ReplyTimeout {
                    runtime,
                    waited: timeout.unwrap_or_default(),
                });
            }
            Err(e) => return Err(e),
        };
        match reply.parent_msg_id() {
            Some(parent) if parent != msg_id => {
                debug!(
                    expected = msg_id,
                    parent,
                    msg_type = reply.msg_type(),
                    "Skipping unrelated shell reply"
                );
            }
            _ => return Ok(reply),
        }
    }
}
