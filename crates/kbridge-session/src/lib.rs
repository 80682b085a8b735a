//! kbridge Session Library
//!
//! Bridges a notebook host to a separate kernel process:
//! - Engine lifecycle (lazy start, readiness, abrupt stop)
//! - Output relay from the kernel to the client channel
//! - Comm registry and routing of client comm messages
//! - JSON-lines host loop used by the `kbridge` binary

pub mod channel;
pub mod comm;
pub mod engine;
pub mod host;
pub mod relay;
pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use channel::{BroadcastChannel, ClientChannel, ClientEvent, JsonLinesChannel};
pub use comm::CommRegistry;
pub use engine::{EngineError, EngineHandle, ExecutionEngine, ProcessEngine};
pub use relay::{ClientMessage, InboundMessage, RouteOutcome};
pub use session::KernelSession;
