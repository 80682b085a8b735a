//! Kernel session: the entry points the host dispatches to.
//!
//! One session owns one engine handle, one comm registry and one client
//! channel. Every operation takes `&mut self`, so submissions and routed
//! messages are serialized per session. The owner must call
//! [`KernelSession::shutdown`] in its teardown path.

use tracing::{info, warn};

use kbridge_core::config::SessionConfig;
use kbridge_core::protocol::Header;

use crate::channel::ClientChannel;
use crate::comm::CommRegistry;
use crate::engine::{EngineError, EngineHandle, ExecutionEngine, StartOutcome};
use crate::relay::{
    DrainSummary, InboundMessage, MessageRouter, OutputRelay, RelayContext, RouteOutcome,
};

pub struct KernelSession<E, C> {
    engine: EngineHandle<E>,
    comms: CommRegistry,
    router: MessageRouter,
    channel: C,
    parent: Option<Header>,
}

impl<E: ExecutionEngine, C: ClientChannel> KernelSession<E, C> {
    pub fn new(engine: E, channel: C, config: &SessionConfig) -> Self {
        Self {
            engine: EngineHandle::new(engine, config.clone()),
            comms: CommRegistry::new(),
            router: MessageRouter::new(OutputRelay::new(config.drain_timeout())),
            channel,
            parent: None,
        }
    }

    /// Set the client request that relayed output is attributed to.
    pub fn set_parent_header(&mut self, parent: Option<Header>) {
        self.parent = parent;
    }

    pub const fn parent_header(&self) -> Option<&Header> {
        self.parent.as_ref()
    }

    pub const fn engine(&self) -> &EngineHandle<E> {
        &self.engine
    }

    pub const fn comms(&self) -> &CommRegistry {
        &self.comms
    }

    pub const fn channel(&self) -> &C {
        &self.channel
    }

    /// Start the kernel if needed and tell the user once it is up.
    pub async fn ensure_started(&mut self) -> Result<StartOutcome, EngineError> {
        let outcome = self.engine.ensure_started().await?;
        if matches!(outcome, StartOutcome::Started(_)) {
            let notice = format!(
                "{} started successfully",
                display_name(self.engine.runtime_name())
            );
            self.channel.notice(&notice);
        }
        Ok(outcome)
    }

    /// Execute `code` in the kernel and relay everything it printed.
    ///
    /// Output is pushed to the client channel; the return value only
    /// summarizes it. When the reply wait times out, output produced so far
    /// is still relayed under this cell's parent and anything the kernel
    /// prints for the cell afterwards is dropped.
    pub async fn run_cell(&mut self, code: &str) -> Result<DrainSummary, EngineError> {
        self.ensure_started().await?;
        let router = self.router;
        match self.engine.submit(code).await {
            Ok(_) => router.relay().drain(&mut self.context()).await,
            Err(e @ EngineError::ReplyTimeout { .. }) => {
                let drained = router.relay().drain(&mut self.context()).await?;
                self.engine.abandon_last_request();
                warn!(
                    runtime = self.engine.runtime_name(),
                    relayed = drained.relayed,
                    "Cell reply timed out; later output for it will be dropped"
                );
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Route a follow-up client message (e.g. a widget event) to its comm.
    pub async fn pass_message(
        &mut self,
        message: InboundMessage,
    ) -> Result<RouteOutcome, EngineError> {
        let router = self.router;
        router.route(&mut self.context(), message).await
    }

    /// Stop the kernel. Safe to call more than once.
    pub async fn shutdown(&mut self) -> Result<(), EngineError> {
        if self.engine.stop().await? {
            info!(
                runtime = self.engine.runtime_name(),
                comms = self.comms.len(),
                "Session shut down"
            );
        }
        Ok(())
    }

    fn context(&mut self) -> RelayContext<'_, E, C> {
        RelayContext {
            engine: &mut self.engine,
            comms: &mut self.comms,
            channel: &self.channel,
            parent: self.parent.as_ref(),
        }
    }
}

/// `groovy` → `Groovy`.
fn display_name(runtime: &str) -> String {
    let mut chars = runtime.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}
