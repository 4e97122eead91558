//! Image loading pipeline: memory, then disk, then network.

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::entities::{
    CacheKey, CacheType, DownloadOutcome, ImageSource, LoadedImage, QueryOptions,
};
use crate::domain::errors::DownloadError;
use crate::infrastructure::cache::ImageCache;
use crate::infrastructure::download::{DownloadHandle, Downloader};

/// Withdraws the caller's token if the load future is dropped mid-download.
struct CancelOnDrop<'a> {
    downloader: &'a Downloader,
    handle: Option<DownloadHandle>,
}

impl CancelOnDrop<'_> {
    fn disarm(mut self) {
        self.handle = None;
    }
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take()
            && self.downloader.cancel(&handle)
        {
            debug!(url = handle.url(), "Image load dropped, download withdrawn");
        }
    }
}

/// Orchestrates image loading from memory, disk, and network.
#[derive(Debug, Clone)]
pub struct ImageLoader {
    cache: Arc<ImageCache>,
    downloader: Arc<Downloader>,
}

impl ImageLoader {
    /// Creates a loader over `cache` and `downloader`.
    #[must_use]
    pub const fn new(cache: Arc<ImageCache>, downloader: Arc<Downloader>) -> Self {
        Self { cache, downloader }
    }

    /// Returns the backing cache.
    #[must_use]
    pub const fn cache(&self) -> &Arc<ImageCache> {
        &self.cache
    }

    /// Returns the shared downloader.
    #[must_use]
    pub const fn downloader(&self) -> &Arc<Downloader> {
        &self.downloader
    }

    /// Loads an image, checking caches first.
    ///
    /// Concurrent loads of one URL share a single download. Dropping the
    /// returned future withdraws only this caller from that download.
    ///
    /// # Errors
    /// Returns error if the image is not cached and cannot be downloaded or decoded.
    pub async fn load(
        &self,
        url: &str,
        options: QueryOptions,
    ) -> Result<LoadedImage, DownloadError> {
        let key =
            CacheKey::new(url).ok_or_else(|| DownloadError::invalid_request("empty url"))?;

        let cached = self
            .cache
            .query(
                url,
                options - QueryOptions::AVOID_DECODE_IMAGE,
                CacheType::All,
            )
            .await;
        if let Some(image) = cached.image {
            let source = if cached.cache_type == CacheType::Memory {
                ImageSource::MemoryCache
            } else {
                ImageSource::DiskCache
            };
            return Ok(LoadedImage { key, image, source });
        }

        debug!(url, "Downloading image from network");
        let bytes = self.download(url).await?;

        let codec = self.cache.codec().clone();
        let data = bytes.clone();
        let decoded = tokio::task::spawn_blocking(move || codec.decode(&data, options))
            .await
            .map_err(|e| DownloadError::decode(format!("decode task panicked: {e}")))?
            .ok_or_else(|| DownloadError::decode("downloaded data is not a supported image"))?;

        let image = Arc::new(decoded);
        self.cache
            .store(Some(image.clone()), Some(bytes), url, true)
            .await;

        Ok(LoadedImage {
            key,
            image,
            source: ImageSource::Network,
        })
    }

    /// Warms the cache for `urls` in the background. Resolves to the number loaded.
    pub fn prefetch(&self, urls: Vec<String>) -> JoinHandle<usize> {
        let loader = self.clone();
        tokio::spawn(async move {
            let loads = urls
                .iter()
                .map(|url| loader.load(url, QueryOptions::empty()));
            let results = join_all(loads).await;
            let mut loaded = 0;
            for (url, result) in urls.iter().zip(results) {
                match result {
                    Ok(_) => loaded += 1,
                    Err(e) => warn!(url = %url, error = %e, "Prefetch failed"),
                }
            }
            debug!(loaded, total = urls.len(), "Prefetch finished");
            loaded
        })
    }

    /// Cancels every in-flight download.
    pub fn cancel_all(&self) {
        self.downloader.cancel_all();
    }

    /// Returns the number of URLs currently downloading.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.downloader.in_flight_count()
    }

    async fn download(&self, url: &str) -> DownloadOutcome {
        let (tx, rx) = oneshot::channel();
        let handle = self.downloader.download(
            self.downloader.request(url),
            None,
            Some(Box::new(move |outcome| {
                let _ = tx.send(outcome);
            })),
        )?;

        let guard = CancelOnDrop {
            downloader: &self.downloader,
            handle: Some(handle),
        };
        let outcome = rx.await.map_err(|_| DownloadError::Cancelled);
        guard.disarm();
        outcome?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{DownloadProgress, DownloadRequest};
    use crate::domain::ports::TransportPort;
    use crate::infrastructure::download::DownloaderConfig;
    use async_trait::async_trait;
    use bytes::Bytes;
    use image::{DynamicImage, ImageFormat};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    fn png_bytes() -> Bytes {
        let mut buf = Vec::new();
        DynamicImage::new_rgba8(8, 4)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        Bytes::from(buf)
    }

    struct StaticTransport {
        calls: AtomicUsize,
        body: Bytes,
        gate: Option<Notify>,
    }

    #[async_trait]
    impl TransportPort for StaticTransport {
        async fn fetch(
            &self,
            _request: &DownloadRequest,
            _progress: &(dyn Fn(DownloadProgress) + Send + Sync),
        ) -> DownloadOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            Ok(self.body.clone())
        }
    }

    fn loader(dir: &TempDir, body: Bytes, gated: bool) -> (ImageLoader, Arc<StaticTransport>) {
        let transport = Arc::new(StaticTransport {
            calls: AtomicUsize::new(0),
            body,
            gate: gated.then(Notify::new),
        });
        let cache = Arc::new(ImageCache::with_directory("loader", Some(dir.path())).unwrap());
        let downloader = Arc::new(Downloader::new(DownloaderConfig::default(), transport.clone()));
        (ImageLoader::new(cache, downloader), transport)
    }

    #[tokio::test]
    async fn test_load_walks_network_memory_disk() {
        let dir = TempDir::new().unwrap();
        let (loader, transport) = loader(&dir, png_bytes(), false);
        let url = "https://example.com/pic.png";

        let first = loader.load(url, QueryOptions::empty()).await.unwrap();
        assert_eq!(first.source, ImageSource::Network);
        assert_eq!((first.image.width(), first.image.height()), (8, 4));

        let second = loader.load(url, QueryOptions::empty()).await.unwrap();
        assert_eq!(second.source, ImageSource::MemoryCache);

        loader.cache().clear_memory();
        let third = loader.load(url, QueryOptions::empty()).await.unwrap();
        assert_eq!(third.source, ImageSource::DiskCache);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_undecodable_download_is_error() {
        let dir = TempDir::new().unwrap();
        let (loader, _) = loader(&dir, Bytes::from_static(b"<html>"), false);
        let result = loader.load("https://example.com/page", QueryOptions::empty()).await;
        assert!(matches!(result, Err(DownloadError::Decode { .. })));
        assert!(!loader.cache().disk_image_exists("https://example.com/page").await);
    }

    #[tokio::test]
    async fn test_dropped_load_withdraws_download() {
        let dir = TempDir::new().unwrap();
        let (loader, transport) = loader(&dir, png_bytes(), true);
        let url = "https://example.com/slow.png";

        let pending = tokio::time::timeout(
            Duration::from_millis(200),
            loader.load(url, QueryOptions::empty()),
        )
        .await;
        assert!(pending.is_err());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(loader.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_prefetch_counts_successes() {
        let dir = TempDir::new().unwrap();
        let (loader, transport) = loader(&dir, png_bytes(), false);
        let urls = vec![
            "https://example.com/1.png".to_string(),
            "https://example.com/2.png".to_string(),
            "https://example.com/1.png".to_string(),
        ];
        let loaded = loader.prefetch(urls).await.unwrap();
        assert_eq!(loaded, 3);
        assert!(transport.calls.load(Ordering::SeqCst) <= 3);
        assert!(
            loader
                .cache()
                .image_from_memory_cache("https://example.com/2.png")
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_empty_url_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (loader, _) = loader(&dir, png_bytes(), false);
        let result = loader.load("", QueryOptions::empty()).await;
        assert!(matches!(result, Err(DownloadError::InvalidRequest { .. })));
    }
}
