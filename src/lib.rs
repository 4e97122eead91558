//! picache - a two-tier image cache with multiplexed downloads.
//!
//! Decoded images live in a cost-bounded LRU memory tier; encoded bytes live
//! in a flat, hashed disk tier with age and size expiry. Network fetches for
//! the same URL are shared by every caller that asks for it.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer containing the image loading pipeline.
pub mod application;
/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing adapters for storage, codecs, and HTTP.
pub mod infrastructure;
/// Presentation layer containing the command-line front end.
pub mod presentation;

pub use application::ImageLoader;
pub use domain::{
    CacheError, CacheKey, CacheType, CachedImage, DownloadError, DownloadState, DownloadToken,
};
pub use infrastructure::{
    CacheConfig, DiskCache, DownloadOperation, Downloader, ImageCache, LifecycleEvent,
    LifecycleNotifier, MemoryCache,
};

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "picache";
