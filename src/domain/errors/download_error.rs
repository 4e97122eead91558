//! Download error types.

use thiserror::Error;

/// Failure outcome of a download, delivered to every subscriber.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum DownloadError {
    #[error("network error: {message}")]
    Network { message: String },

    #[error("unexpected HTTP status {status}")]
    Http { status: u16 },

    #[error("request timed out")]
    Timeout,

    #[error("download cancelled")]
    Cancelled,

    #[error("server returned an empty body")]
    EmptyResponse,

    #[error("downloaded data could not be decoded: {message}")]
    Decode { message: String },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

impl DownloadError {
    /// Creates network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates invalid request error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Returns whether retrying the same request could succeed.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout => true,
            Self::Http { status } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors() {
        assert!(DownloadError::Timeout.is_recoverable());
        assert!(DownloadError::network("reset").is_recoverable());
        assert!(DownloadError::Http { status: 503 }.is_recoverable());
        assert!(!DownloadError::Http { status: 404 }.is_recoverable());
        assert!(!DownloadError::Cancelled.is_recoverable());
    }
}
