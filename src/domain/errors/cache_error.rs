//! Cache error types.

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors that can occur inside the cache tiers.
///
/// Public query paths absorb these and report a miss instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// Stored bytes could not be decoded.
    #[error("decode error: {0}")]
    DecodeError(String),
    /// File system failure.
    #[error("io error: {0}")]
    IoError(String),
    /// The background I/O queue has shut down.
    #[error("io queue closed")]
    QueueClosed,
}

impl CacheError {
    /// Creates an I/O error with context.
    #[must_use]
    pub fn io(context: &str, err: &std::io::Error) -> Self {
        Self::IoError(format!("{context}: {err}"))
    }

    /// Creates a decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::DecodeError(message.into())
    }
}
