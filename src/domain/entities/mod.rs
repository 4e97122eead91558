//! Domain entity definitions.

mod cache_key;
mod cached_image;
mod download;
mod options;

pub use cache_key::CacheKey;
pub use download::{
    DownloadOutcome, DownloadProgress, DownloadRequest, DownloadState, DownloadToken,
};
pub use cached_image::{CacheQueryResult, CacheType, CachedImage, ImageSource, LoadedImage};
pub use options::{DiskReadOptions, DiskWriteOptions, LARGE_IMAGE_PIXEL_BYTES, QueryOptions};
