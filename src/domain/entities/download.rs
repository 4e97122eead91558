//! Domain types for multiplexed downloads.

use std::time::Duration;

use bytes::Bytes;
use uuid::Uuid;

use crate::domain::errors::DownloadError;

/// Opaque handle for one caller's interest in a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DownloadToken(Uuid);

impl DownloadToken {
    /// Generates a fresh token.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for DownloadToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a download operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownloadState {
    /// Created, transport not yet started.
    #[default]
    Pending,
    /// Transport in progress.
    Running,
    /// Transport completed, successfully or not.
    Finished,
    /// Every subscriber withdrew before completion.
    Cancelled,
}

impl DownloadState {
    /// Returns true for `Finished` and `Cancelled`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled)
    }
}

/// Final result delivered to every subscriber.
pub type DownloadOutcome = Result<Bytes, DownloadError>;

/// Describes what to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Resource URL; also the identity used to join in-flight downloads.
    pub url: String,
    /// Transport timeout.
    pub timeout: Duration,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
}

impl DownloadRequest {
    /// Default transport timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

    /// Creates a request with the default timeout.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Self::DEFAULT_TIMEOUT,
            headers: Vec::new(),
        }
    }

    /// Sets the timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Adds a request header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Transfer progress snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Bytes received so far.
    pub received: u64,
    /// Total expected bytes, if the transport knows it.
    pub expected: Option<u64>,
}

impl DownloadProgress {
    /// Completed fraction in `0.0..=1.0`, if the total is known.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> Option<f64> {
        match self.expected {
            Some(0) | None => None,
            Some(total) => Some((self.received as f64 / total as f64).min(1.0)),
        }
    }
}
