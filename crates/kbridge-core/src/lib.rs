//! `kbridge` Core Library
//!
//! Shared functionality for `kbridge` components:
//! - Kernel wire protocol (Jupyter-shaped messages over NDJSON)
//! - Configuration resolution and hierarchy
//! - Tracing initialisation
//! - Common error types

pub mod config;
pub mod error;
pub mod protocol;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
