//! Relay module: moves kernel output to the client and client messages
//! back to the kernel.
//!
//! Data flow:
//! ```text
//! kernel iopub → OutputRelay::drain → CommRegistry (new comm ids) → ClientChannel
//! client comm_msg → MessageRouter::route → CommRegistry check → kernel shell → drain
//! ```

mod output;
mod router;
mod types;

pub use output::OutputRelay;
pub use router::MessageRouter;
pub use types::*;

use kbridge_core::protocol::Header;

use crate::comm::CommRegistry;
use crate::engine::EngineHandle;

/// Borrowed session state one relay or route pass works on.
pub struct RelayContext<'a, E, C> {
    pub engine: &'a mut EngineHandle<E>,
    pub comms: &'a mut CommRegistry,
    pub channel: &'a C,
    /// Correlation header of the client request being served.
    pub parent: Option<&'a Header>,
}
