//! Kernel subprocess engine.
//!
//! Spawns the configured kernel command with piped stdio. Requests are
//! written to stdin one JSON message per line; stdout lines are parsed and
//! demultiplexed by channel into a shell-reply queue and an output queue.
//! When stdout closes the queues close with it, which is how a dead kernel
//! surfaces as [`EngineError::Unavailable`].

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use kbridge_core::config::KernelConfig;
use kbridge_core::protocol::{self, Channel, WireMessage};

use super::types::{EngineCapabilities, EngineError, ExecutionEngine, OutputEvent};

const STDIN_CAPACITY: usize = 32;

/// Engine backed by a kernel child process.
pub struct ProcessEngine {
    kernel: KernelConfig,
    capabilities: EngineCapabilities,
    process: Option<RunningKernel>,
}

struct RunningKernel {
    child: Child,
    stdin_tx: mpsc::Sender<String>,
    shell_rx: mpsc::UnboundedReceiver<WireMessage>,
    iopub_rx: mpsc::UnboundedReceiver<WireMessage>,
}

impl ProcessEngine {
    pub fn new(kernel: KernelConfig) -> Self {
        Self {
            kernel,
            capabilities: EngineCapabilities::default(),
            process: None,
        }
    }

    /// Override the advertised capabilities (e.g. for kernels that do not
    /// answer `kernel_info_request`).
    #[must_use]
    pub const fn with_capabilities(mut self, capabilities: EngineCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// OS process id of the running kernel.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.child.id())
    }

    fn unavailable(&mut self, reason: &str) -> EngineError {
        let status = self
            .process
            .as_mut()
            .and_then(|p| p.child.try_wait().ok().flatten());
        let reason = match status {
            Some(status) => format!("{reason} ({status})"),
            None => reason.to_string(),
        };
        EngineError::Unavailable {
            runtime: self.kernel.name.clone(),
            reason,
        }
    }

    fn spawn_failed(&self, reason: impl Into<String>) -> EngineError {
        EngineError::SpawnFailed {
            runtime: self.kernel.name.clone(),
            reason: reason.into(),
        }
    }
}

impl ExecutionEngine for ProcessEngine {
    fn runtime_name(&self) -> &str {
        &self.kernel.name
    }

    fn capabilities(&self) -> EngineCapabilities {
        self.capabilities
    }

    async fn start(&mut self) -> Result<(), EngineError> {
        if self.process.is_some() {
            return Ok(());
        }
        let Some((program, args)) = self.kernel.argv.split_first() else {
            return Err(self.spawn_failed("empty kernel command"));
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&self.kernel.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(
            runtime = %self.kernel.name,
            program = %program,
            "Spawning kernel subprocess"
        );
        let mut child = cmd.spawn().map_err(|e| self.spawn_failed(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.spawn_failed("Failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.spawn_failed("Failed to capture stdout"))?;

        // Stdin writer
        let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(STDIN_CAPACITY);
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(line) = stdin_rx.recv().await {
                if let Err(e) = stdin.write_all(line.as_bytes()).await {
                    error!("Failed to write to kernel stdin: {}", e);
                    break;
                }
                if let Err(e) = stdin.write_all(b"\n").await {
                    error!("Failed to write newline: {}", e);
                    break;
                }
                if let Err(e) = stdin.flush().await {
                    error!("Failed to flush kernel stdin: {}", e);
                    break;
                }
            }
        });

        // Stdout reader, demultiplexed by channel. Never blocks on a queue:
        // a shell reply can sit behind any amount of undrained output.
        let (shell_tx, shell_rx) = mpsc::unbounded_channel::<WireMessage>();
        let (iopub_tx, iopub_rx) = mpsc::unbounded_channel::<WireMessage>();
        let runtime = self.kernel.name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                let message = match protocol::parse_line(&line) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(runtime = %runtime, error = %e, "Unparsable kernel output line");
                        continue;
                    }
                };
                debug!(
                    runtime = %runtime,
                    channel = message.channel.as_str(),
                    msg_type = message.msg_type(),
                    "Kernel message"
                );
                let queue = match message.channel {
                    Channel::Shell => &shell_tx,
                    Channel::IoPub => &iopub_tx,
                    Channel::Stdin => {
                        warn!(
                            runtime = %runtime,
                            msg_type = message.msg_type(),
                            "Kernel requested stdin input, which is not forwarded"
                        );
                        continue;
                    }
                    Channel::Control => continue,
                };
                if queue.send(message).is_err() {
                    debug!(runtime = %runtime, "Kernel queue closed");
                    break;
                }
            }
            info!(runtime = %runtime, "Kernel stdout reader finished");
        });

        // Stderr reader for diagnostics
        if let Some(stderr) = child.stderr.take() {
            let runtime = self.kernel.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(runtime = %runtime, "stderr: {}", line);
                }
                debug!(runtime = %runtime, "Kernel stderr reader finished");
            });
        }

        self.process = Some(RunningKernel {
            child,
            stdin_tx,
            shell_rx,
            iopub_rx,
        });
        Ok(())
    }

    async fn send(&mut self, message: WireMessage) -> Result<(), EngineError> {
        let line = protocol::encode(&message)?;
        let Some(process) = self.process.as_ref() else {
            return Err(self.unavailable("kernel not started"));
        };
        if process.stdin_tx.send(line).await.is_err() {
            return Err(self.unavailable("kernel stdin closed"));
        }
        Ok(())
    }

    async fn recv_reply(&mut self, timeout: Option<Duration>) -> Result<WireMessage, EngineError> {
        let Some(process) = self.process.as_mut() else {
            return Err(self.unavailable("kernel not started"));
        };
        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, process.shell_rx.recv()).await {
                Ok(received) => received,
                Err(_) => {
                    return Err(EngineError::ReplyTimeout {
                        runtime: self.kernel.name.clone(),
                        waited: limit,
                    });
                }
            },
            None => process.shell_rx.recv().await,
        };
        match received {
            Some(reply) => Ok(reply),
            None => Err(self.unavailable("kernel closed its shell channel")),
        }
    }

    async fn recv_output(&mut self, timeout: Duration) -> Result<Option<OutputEvent>, EngineError> {
        let Some(process) = self.process.as_mut() else {
            return Err(self.unavailable("kernel not started"));
        };
        match tokio::time::timeout(timeout, process.iopub_rx.recv()).await {
            Ok(Some(message)) => Ok(Some(OutputEvent::from(message))),
            Ok(None) => Err(self.unavailable("kernel closed its output channel")),
            Err(_) => Ok(None),
        }
    }

    async fn terminate(&mut self) -> Result<(), EngineError> {
        let Some(process) = self.process.take() else {
            return Ok(());
        };
        let RunningKernel {
            mut child,
            stdin_tx,
            shell_rx,
            iopub_rx,
        } = process;

        // Channels first, then the process.
        drop(stdin_tx);
        drop(shell_rx);
        drop(iopub_rx);

        if let Err(e) = child.kill().await {
            warn!(runtime = %self.kernel.name, error = %e, "Failed to kill kernel");
        }
        match child.try_wait() {
            Ok(status) => info!(runtime = %self.kernel.name, ?status, "Kernel terminated"),
            Err(e) => warn!(runtime = %self.kernel.name, error = %e, "Error reaping kernel"),
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_command_fails_to_spawn() {
        let mut engine = ProcessEngine::new(KernelConfig {
            argv: Vec::new(),
            ..KernelConfig::default()
        });
        let err = engine.start().await.unwrap_err();
        assert!(matches!(err, EngineError::SpawnFailed { .. }));
        assert!(engine.pid().is_none());
    }

    #[tokio::test]
    async fn missing_binary_fails_to_spawn() {
        let mut engine = ProcessEngine::new(KernelConfig {
            argv: vec!["/nonexistent/kbridge-test-kernel".into()],
            ..KernelConfig::default()
        });
        let err = engine.start().await.unwrap_err();
        assert!(matches!(err, EngineError::SpawnFailed { ref runtime, .. } if runtime == "groovy"));
    }

    #[tokio::test]
    async fn io_before_start_is_unavailable() {
        let mut engine = ProcessEngine::new(KernelConfig::default());
        let err = engine.recv_output(Duration::from_millis(1)).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn terminate_without_process_is_noop() {
        let mut engine = ProcessEngine::new(KernelConfig::default());
        engine.terminate().await.unwrap();
        engine.terminate().await.unwrap();
    }
}
