//! Message router: forwards client comm messages into the kernel.

use tracing::{Level, debug, enabled, warn};

use crate::channel::ClientChannel;
use crate::engine::{EngineError, ExecutionEngine};

use super::RelayContext;
use super::output::OutputRelay;
use super::types::{InboundMessage, RouteOutcome};

/// Routes inbound client messages to known comms.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageRouter {
    relay: OutputRelay,
}

impl MessageRouter {
    pub const fn new(relay: OutputRelay) -> Self {
        Self { relay }
    }

    pub const fn relay(&self) -> &OutputRelay {
        &self.relay
    }

    /// Forward `message` if its comm is registered, then drain the output
    /// it caused. Unknown comms are logged and dropped.
    pub async fn route<E, C>(
        &self,
        ctx: &mut RelayContext<'_, E, C>,
        message: InboundMessage,
    ) -> Result<RouteOutcome, EngineError>
    where
        E: ExecutionEngine,
        C: ClientChannel,
    {
        let comm_id = match message.target_comm_id() {
            Some(id) if ctx.comms.contains(id) => id.to_string(),
            other => {
                let comm_id = other.map(String::from);
                warn!(comm_id = ?comm_id, msg_type = %message.msg_type, "No such comm");
                if enabled!(Level::DEBUG) {
                    let known: Vec<&str> = ctx.comms.iter().collect();
                    debug!(?known, "Current comms");
                }
                return Ok(RouteOutcome::Dropped { comm_id });
            }
        };

        ctx.engine.send(&message.msg_type, message.content).await?;
        debug!(comm_id = %comm_id, msg_type = %message.msg_type, "Forwarded to kernel");

        let drained = self.relay.drain(ctx).await?;
        Ok(RouteOutcome::Forwarded { comm_id, drained })
    }
}
