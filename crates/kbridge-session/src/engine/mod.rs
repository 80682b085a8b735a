//! Execution engine: the kernel process and its lifecycle.

mod handle;
mod process;
mod readiness;
mod types;

pub use handle::{EngineHandle, EngineState, StartOutcome};
pub use process::ProcessEngine;
pub use readiness::{Readiness, ReadinessStrategy};
pub use types::{EngineCapabilities, EngineError, ExecutionEngine, OutputEvent};
