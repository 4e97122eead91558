//! Port definition for the network transport.

use async_trait::async_trait;

use crate::domain::entities::{DownloadOutcome, DownloadProgress, DownloadRequest};

/// Performs the actual byte transfer for a download.
///
/// A timeout must be reported as `DownloadError::Timeout`.
#[async_trait]
pub trait TransportPort: Send + Sync {
    /// Fetches the resource described by `request`, reporting progress as bytes arrive.
    async fn fetch(
        &self,
        request: &DownloadRequest,
        progress: &(dyn Fn(DownloadProgress) + Send + Sync),
    ) -> DownloadOutcome;
}
