//! JSON-lines host loop.
//!
//! Stands in for the notebook shell: each input line is one command.
//! ```text
//! {"op":"run_cell","code":"x = 2 + 2"}
//! {"op":"pass_message","msg_type":"comm_msg","content":{"comm_id":"abc123","data":{}}}
//! {"op":"shutdown"}
//! ```

use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, error, info, warn};

use kbridge_core::protocol::{Header, msg_type};

use crate::channel::ClientChannel;
use crate::engine::{EngineError, ExecutionEngine};
use crate::relay::{InboundMessage, RouteOutcome};
use crate::session::KernelSession;

/// One command from the host.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HostCommand {
    RunCell {
        code: String,
        #[serde(default)]
        parent_header: Option<Header>,
    },
    PassMessage {
        msg_type: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        comm_id: Option<String>,
        #[serde(default)]
        parent_header: Option<Header>,
    },
    Shutdown,
}

/// Counters for one host run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostSummary {
    pub cells: usize,
    pub routed: usize,
    pub dropped: usize,
    /// Cells or messages that failed without killing the kernel.
    pub failures: usize,
    /// Input lines that were not valid commands.
    pub rejected: usize,
}

/// Errors that end the host loop.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Failed to read host input: {0}")]
    Io(#[from] std::io::Error),

    #[error("Kernel error: {0}")]
    Engine(#[from] EngineError),
}

/// Serve commands from `input` until EOF, a `shutdown` command, or the
/// kernel dying. The session is shut down before returning.
pub async fn run_host<E, C, R>(
    session: &mut KernelSession<E, C>,
    input: R,
) -> Result<HostSummary, HostError>
where
    E: ExecutionEngine,
    C: ClientChannel,
    R: AsyncBufRead + Unpin,
{
    let host_session = uuid::Uuid::new_v4().to_string();
    let mut summary = HostSummary::default();
    let mut lines = input.lines();

    let outcome = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(e) => break Err(HostError::Io(e)),
        };
        if line.trim().is_empty() {
            continue;
        }
        let command: HostCommand = match serde_json::from_str(&line) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed host command");
                summary.rejected += 1;
                continue;
            }
        };

        let result = match command {
            HostCommand::RunCell {
                code,
                parent_header,
            } => {
                session.set_parent_header(Some(parent_header.unwrap_or_else(|| {
                    Header::new(msg_type::EXECUTE_REQUEST, &host_session)
                })));
                session.run_cell(&code).await.map(|drained| {
                    summary.cells += 1;
                    debug!(relayed = drained.relayed, "Cell finished");
                })
            }
            HostCommand::PassMessage {
                msg_type,
                content,
                comm_id,
                parent_header,
            } => {
                session.set_parent_header(Some(
                    parent_header.unwrap_or_else(|| Header::new(&msg_type, &host_session)),
                ));
                let message = InboundMessage {
                    msg_type,
                    content,
                    comm_id,
                };
                session.pass_message(message).await.map(|outcome| match outcome {
                    RouteOutcome::Forwarded { .. } => summary.routed += 1,
                    RouteOutcome::Dropped { .. } => summary.dropped += 1,
                })
            }
            HostCommand::Shutdown => {
                info!("Shutdown requested by host");
                break Ok(());
            }
        };

        if let Err(e) = result {
            if e.is_fatal() {
                error!(error = %e, "Kernel is gone; stopping host loop");
                break Err(HostError::Engine(e));
            }
            error!(error = %e, "Command failed");
            summary.failures += 1;
        }
    };

    if let Err(e) = session.shutdown().await {
        if outcome.is_ok() {
            return Err(e.into());
        }
        warn!(error = %e, "Shutdown failed after host loop error");
    }
    outcome.map(|()| summary)
}
