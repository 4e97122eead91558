//! Per-URL download coalescing with bounded concurrency.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info};

use super::http_transport::HttpTransport;
use super::operation::{CompletionCallback, DownloadOperation, ProgressCallback, Subscription};
use crate::domain::entities::{DownloadRequest, DownloadToken};
use crate::domain::errors::DownloadError;
use crate::domain::ports::TransportPort;

/// Downloader settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    /// Maximum fetches running at once.
    pub max_concurrent_downloads: usize,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Minimum completed fraction between two progress deliveries.
    pub minimum_progress_interval: f64,
    /// `User-Agent` header sent with every request.
    pub user_agent: String,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 6,
            timeout_secs: 15,
            minimum_progress_interval: 0.0,
            user_agent: concat!("picache/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl DownloaderConfig {
    /// Per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// One caller's stake in a download, used to cancel it.
#[derive(Debug, Clone)]
pub struct DownloadHandle {
    url: String,
    token: DownloadToken,
    operation: Weak<DownloadOperation>,
}

impl DownloadHandle {
    /// Returns the URL being downloaded.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns this caller's token.
    #[must_use]
    pub const fn token(&self) -> DownloadToken {
        self.token
    }
}

type OperationMap = Mutex<HashMap<String, Arc<DownloadOperation>>>;

/// Joins concurrent requests for the same URL into one [`DownloadOperation`].
pub struct Downloader {
    config: DownloaderConfig,
    transport: Arc<dyn TransportPort>,
    permits: Arc<Semaphore>,
    operations: Arc<OperationMap>,
}

impl Downloader {
    /// Creates a downloader that fetches through `transport`.
    #[must_use]
    pub fn new(config: DownloaderConfig, transport: Arc<dyn TransportPort>) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_downloads.max(1)));
        Self {
            config,
            transport,
            permits,
            operations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Creates a downloader using [`HttpTransport`].
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn with_http(config: DownloaderConfig) -> Result<Self, DownloadError> {
        let transport = HttpTransport::new(&config.user_agent)?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    /// Returns the downloader settings.
    #[must_use]
    pub const fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    /// Builds a request for `url` with the configured timeout.
    #[must_use]
    pub fn request(&self, url: impl Into<String>) -> DownloadRequest {
        DownloadRequest::new(url).with_timeout(self.config.timeout())
    }

    /// Subscribes to the download of `request.url`, starting it if none is in flight.
    ///
    /// # Errors
    /// Returns `DownloadError::InvalidRequest` for an empty URL; `completion` is not called.
    pub fn download(
        &self,
        request: DownloadRequest,
        progress: Option<ProgressCallback>,
        completion: Option<CompletionCallback>,
    ) -> Result<DownloadHandle, DownloadError> {
        if request.url.is_empty() {
            return Err(DownloadError::invalid_request("empty url"));
        }

        let url = request.url.clone();
        let mut subscription = Subscription::new(progress, completion);
        loop {
            let operation = self.operation_for(&request);
            match operation.try_register(subscription) {
                Ok(token) => {
                    operation.start();
                    return Ok(DownloadHandle {
                        url,
                        token,
                        operation: Arc::downgrade(&operation),
                    });
                }
                // Cancelled between lookup and registration; retry on a fresh operation.
                Err(returned) => subscription = returned,
            }
        }
    }

    /// Withdraws the caller behind `handle`. Returns false if it was no longer subscribed.
    pub fn cancel(&self, handle: &DownloadHandle) -> bool {
        handle
            .operation
            .upgrade()
            .is_some_and(|operation| operation.cancel(handle.token))
    }

    /// Cancels every in-flight download; all subscribers receive `DownloadError::Cancelled`.
    pub fn cancel_all(&self) {
        let operations: Vec<_> = self.operations.lock().drain().map(|(_, op)| op).collect();
        if !operations.is_empty() {
            info!(count = operations.len(), "Cancelling all downloads");
        }
        for operation in operations {
            operation.cancel_all();
        }
    }

    /// Number of URLs currently being fetched or queued.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.operations.lock().len()
    }

    /// Returns true if `url` has a live download.
    #[must_use]
    pub fn is_downloading(&self, url: &str) -> bool {
        self.operations.lock().contains_key(url)
    }

    fn operation_for(&self, request: &DownloadRequest) -> Arc<DownloadOperation> {
        let mut operations = self.operations.lock();
        if let Some(existing) = operations.get(&request.url)
            && !existing.state().is_terminal()
        {
            debug!(url = %request.url, "Joining in-flight download");
            return existing.clone();
        }

        let operation = DownloadOperation::with_limits(
            request.clone(),
            self.transport.clone(),
            Some(self.permits.clone()),
            self.config.minimum_progress_interval,
        );
        operations.insert(request.url.clone(), operation.clone());
        drop(operations);

        let map = Arc::downgrade(&self.operations);
        let url = request.url.clone();
        let id = operation.id();
        operation.set_terminal_hook(Box::new(move || {
            if let Some(map) = map.upgrade() {
                let mut operations = map.lock();
                if operations.get(&url).is_some_and(|op| op.id() == id) {
                    operations.remove(&url);
                }
            }
        }));
        operation
    }
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("config", &self.config)
            .field("in_flight", &self.in_flight_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::DownloadState;
    use crate::infrastructure::download::operation::tests::GatedTransport;
    use bytes::Bytes;
    use tokio::sync::mpsc;

    async fn wait_for(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_config_defaults_and_toml() {
        let config = DownloaderConfig::default();
        assert_eq!(config.max_concurrent_downloads, 6);
        assert_eq!(config.timeout(), Duration::from_secs(15));

        let parsed: DownloaderConfig = toml::from_str("timeout_secs = 3").unwrap();
        assert_eq!(parsed.timeout_secs, 3);
        assert_eq!(parsed.max_concurrent_downloads, 6);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_fetch() {
        let transport = GatedTransport::new(Ok(Bytes::from_static(b"shared")));
        let downloader = Downloader::new(DownloaderConfig::default(), transport.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let tx = tx.clone();
            handles.push(
                downloader
                    .download(
                        downloader.request("https://example.com/x.png"),
                        None,
                        Some(Box::new(move |outcome| {
                            let _ = tx.send(outcome);
                        })),
                    )
                    .unwrap(),
            );
        }
        assert_eq!(downloader.in_flight_count(), 1);
        assert!(downloader.is_downloading("https://example.com/x.png"));

        wait_for(|| transport.calls() == 1).await;
        transport.release();
        for _ in 0..4 {
            assert_eq!(rx.recv().await.unwrap(), Ok(Bytes::from_static(b"shared")));
        }
        assert_eq!(transport.calls(), 1);
        wait_for(|| downloader.in_flight_count() == 0).await;
    }

    #[tokio::test]
    async fn test_cancel_handle_withdraws_only_that_caller() {
        let transport = GatedTransport::new(Ok(Bytes::from_static(b"img")));
        let downloader = Downloader::new(DownloaderConfig::default(), transport.clone());
        let url = "https://example.com/y.png";

        let first = downloader.download(downloader.request(url), None, None).unwrap();
        let second = downloader.download(downloader.request(url), None, None).unwrap();
        assert_ne!(first.token(), second.token());

        assert!(downloader.cancel(&first));
        assert!(!downloader.cancel(&first));
        assert_eq!(downloader.in_flight_count(), 1);

        assert!(downloader.cancel(&second));
        assert_eq!(downloader.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_new_request_after_cancel_starts_fresh_operation() {
        let transport = GatedTransport::new(Ok(Bytes::from_static(b"img")));
        let downloader = Downloader::new(DownloaderConfig::default(), transport.clone());
        let url = "https://example.com/z.png";

        let handle = downloader.download(downloader.request(url), None, None).unwrap();
        wait_for(|| transport.calls() == 1).await;
        downloader.cancel(&handle);

        let again = downloader.download(downloader.request(url), None, None).unwrap();
        let operation = again.operation.upgrade().unwrap();
        assert_ne!(operation.state(), DownloadState::Cancelled);
        wait_for(|| transport.calls() == 2).await;
        transport.release();
    }

    #[tokio::test]
    async fn test_cancel_all_fails_every_subscriber() {
        let transport = GatedTransport::new(Ok(Bytes::from_static(b"img")));
        let downloader = Downloader::new(DownloaderConfig::default(), transport.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        for url in ["https://a.test/1", "https://a.test/2"] {
            let tx = tx.clone();
            downloader
                .download(
                    downloader.request(url),
                    None,
                    Some(Box::new(move |outcome| {
                        let _ = tx.send(outcome);
                    })),
                )
                .unwrap();
        }

        downloader.cancel_all();
        for _ in 0..2 {
            assert_eq!(rx.recv().await.unwrap(), Err(DownloadError::Cancelled));
        }
        assert_eq!(downloader.in_flight_count(), 0);
    }

    #[test]
    fn test_empty_url_is_rejected() {
        let downloader = Downloader::new(
            DownloaderConfig::default(),
            GatedTransport::new(Ok(Bytes::new())),
        );
        let result = downloader.download(DownloadRequest::new(""), None, None);
        assert!(matches!(result, Err(DownloadError::InvalidRequest { .. })));
    }
}
