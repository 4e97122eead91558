//! Infrastructure layer with cache, codec, and network adapters.

/// Memory and disk cache tiers.
pub mod cache;
/// Image codecs.
pub mod codec;
/// Application configuration.
pub mod config;
/// Network downloads.
pub mod download;

pub use cache::{
    CacheStats, DiskCache, ImageCache, IoQueue, LifecycleEvent, LifecycleNotifier,
    LifecycleSubscription, MemoryCache,
};
pub use codec::ImageCrateCodec;
pub use config::{AppConfig, CacheConfig, CliArgs, LogLevel, StorageManager};
pub use download::{
    DownloadHandle, DownloadOperation, Downloader, DownloaderConfig, HttpTransport,
};
