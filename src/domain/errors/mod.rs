//! Domain error types.

mod cache_error;
mod download_error;

pub use cache_error::{CacheError, CacheResult};
pub use download_error::DownloadError;
