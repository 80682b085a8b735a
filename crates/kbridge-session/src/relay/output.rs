//! Output relay: drains kernel output into the client channel.

use std::time::Duration;

use tracing::debug;

use crate::channel::ClientChannel;
use crate::engine::{EngineError, ExecutionEngine};

use super::RelayContext;
use super::types::{ClientMessage, DrainSummary};

/// Drains pending kernel output until the kernel stays quiet for `timeout`.
#[derive(Debug, Clone, Copy)]
pub struct OutputRelay {
    timeout: Duration,
}

impl OutputRelay {
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Republish every pending event in arrival order.
    ///
    /// A quiet period ends the drain. If the kernel dies mid-drain, events
    /// already read are published before the error is returned.
    pub async fn drain<E, C>(
        &self,
        ctx: &mut RelayContext<'_, E, C>,
    ) -> Result<DrainSummary, EngineError>
    where
        E: ExecutionEngine,
        C: ClientChannel,
    {
        let mut summary = DrainSummary::default();
        while let Some(event) = ctx.engine.next_output(self.timeout).await? {
            if let Some(comm_id) = event.comm_id.as_deref()
                && ctx.comms.register(comm_id)
            {
                debug!(comm_id, msg_type = %event.msg_type, "Registered comm");
                summary.new_comms += 1;
            }
            debug!(msg_type = %event.msg_type, comm_id = ?event.comm_id, "Relaying kernel output");
            ctx.channel.publish(ClientMessage::relayed(event, ctx.parent));
            summary.relayed += 1;
        }
        debug!(
            relayed = summary.relayed,
            new_comms = summary.new_comms,
            "Kernel output drained"
        );
        Ok(summary)
    }
}

impl Default for OutputRelay {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
