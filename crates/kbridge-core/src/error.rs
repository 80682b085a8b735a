//! Error types for `kbridge` core library.

use thiserror::Error;

/// Result type alias using `kbridge` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `kbridge` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Kernel wire message could not be decoded
    #[error("Failed to parse kernel message: {0}")]
    WireParse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
