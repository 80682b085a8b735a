//! Kernel wire protocol.
//!
//! Kernels exchange Jupyter-shaped messages with the bridge, one JSON object
//! per line on stdio. This module holds the message types and a tolerant
//! reader for them.

mod parser;
mod types;

pub use parser::{encode, parse_line, parse_value};
pub use types::*;
