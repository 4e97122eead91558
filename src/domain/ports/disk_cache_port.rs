//! Port definition for the on-disk cache tier.

use std::path::PathBuf;

use crate::domain::entities::CacheKey;
use crate::domain::errors::CacheResult;

/// Summary of one expiry sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// File names removed, expired ones first.
    pub removed: Vec<String>,
    /// Bytes freed.
    pub removed_bytes: u64,
    /// Total bytes left in the cache.
    pub remaining_size: u64,
    /// Files left in the cache.
    pub remaining_count: usize,
}

impl CleanupReport {
    /// Returns true if nothing was removed.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.removed.is_empty()
    }
}

/// Capability set of a disk cache tier.
///
/// Every method is synchronous; callers serialize access through a single
/// background queue, so implementations need only be `Send`.
pub trait DiskCachePort: Send {
    /// Returns true if data is stored for `key`.
    fn contains_data(&self, key: &CacheKey) -> bool;

    /// Reads the stored bytes for `key`.
    fn data(&self, key: &CacheKey) -> Option<Vec<u8>>;

    /// Writes `data` for `key`.
    ///
    /// # Errors
    /// Returns error if the file cannot be written.
    fn set_data(&self, key: &CacheKey, data: &[u8]) -> CacheResult<()>;

    /// Deletes the data for `key`. A missing entry is not an error.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be removed.
    fn remove_data(&self, key: &CacheKey) -> CacheResult<()>;

    /// Deletes every entry.
    ///
    /// # Errors
    /// Returns error if the directory cannot be emptied or recreated.
    fn remove_all_data(&self) -> CacheResult<()>;

    /// Deletes expired entries, then trims to half the size limit if still over it.
    fn remove_expired_data(&self) -> CleanupReport;

    /// Returns the file path used for `key`.
    fn cache_path(&self, key: &CacheKey) -> PathBuf;

    /// Returns the number of stored entries.
    fn total_count(&self) -> usize;

    /// Returns the total bytes stored.
    fn total_size(&self) -> u64;
}
