//! Readiness strategies for a freshly spawned engine.
//!
//! The strategy is picked once, before waiting, from the configured mode and
//! the engine's advertised capabilities.

use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};

use kbridge_core::config::{ReadinessMode, SessionConfig};
use kbridge_core::protocol::{Channel, Header, WireMessage, msg_type};

use super::handle::await_reply;
use super::types::{EngineCapabilities, EngineError, ExecutionEngine};

/// How to decide the engine is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessStrategy {
    /// Send `kernel_info_request` and wait for its reply. Times out with
    /// [`EngineError::Startup`].
    KernelInfo { timeout: Duration },
    /// Wait a fixed period and assume readiness. Never fails.
    Settle { period: Duration },
}

/// How readiness was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The engine answered the probe.
    Confirmed,
    /// The settle period elapsed without a probe.
    Assumed,
}

impl ReadinessStrategy {
    pub fn select(
        mode: ReadinessMode,
        capabilities: EngineCapabilities,
        config: &SessionConfig,
    ) -> Self {
        let probe = match mode {
            ReadinessMode::Auto => capabilities.kernel_info,
            ReadinessMode::KernelInfo => true,
            ReadinessMode::Settle => false,
        };
        if probe {
            Self::KernelInfo {
                timeout: config.startup_timeout(),
            }
        } else {
            Self::Settle {
                period: config.settle(),
            }
        }
    }

    pub(super) async fn wait<E: ExecutionEngine>(
        self,
        engine: &mut E,
        session_id: &str,
    ) -> Result<Readiness, EngineError> {
        match self {
            Self::KernelInfo { timeout } => {
                let header = Header::new(msg_type::KERNEL_INFO_REQUEST, session_id);
                let msg_id = header.msg_id.clone();
                engine
                    .send(WireMessage::new(Channel::Shell, header, json!({})))
                    .await?;

                match await_reply(engine, &msg_id, Some(timeout)).await {
                    Ok(reply) => {
                        debug!(
                            runtime = engine.runtime_name(),
                            implementation = ?reply.content.get("implementation"),
                            "Kernel info received"
                        );
                        Ok(Readiness::Confirmed)
                    }
                    Err(EngineError::ReplyTimeout { runtime, .. }) => Err(EngineError::Startup {
                        runtime,
                        waited: timeout,
                    }),
                    Err(e) => Err(e),
                }
            }
            Self::Settle { period } => {
                tokio::time::sleep(period).await;
                warn!(
                    runtime = engine.runtime_name(),
                    settle_ms = period.as_millis(),
                    "Kernel readiness not probed; assuming ready after settle period"
                );
                Ok(Readiness::Assumed)
            }
        }
    }
}
