//! Domain layer with core cache and download entities and port definitions.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;

pub use entities::{CacheKey, CacheType, CachedImage, DownloadState, DownloadToken};
pub use errors::{CacheError, DownloadError};
pub use ports::{DiskCachePort, ImageCodecPort, MemoryCachePort, TransportPort};
