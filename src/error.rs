//! Crate-level error types.

use thiserror::Error;

/// Result type alias for configuration and storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the config store and other infrastructure pieces.
///
/// Fleet-facing operations never return these directly: per the error
/// policy every public fleet operation reports a success flag plus a
/// human-readable detail string, and converts failures into log events.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (missing fields, invalid values)
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
