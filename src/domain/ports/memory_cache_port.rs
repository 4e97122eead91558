//! Port definition for the in-memory cache tier.

use std::sync::Arc;

use crate::domain::entities::CachedImage;

/// Capability set of a memory cache tier.
/// Implementations must be thread-safe and must never block on I/O.
pub trait MemoryCachePort: Send + Sync {
    /// Returns the cached image for `key`, if present.
    fn get(&self, key: &str) -> Option<Arc<CachedImage>>;

    /// Stores `image` under `key` with the given cost, evicting as needed
    /// before returning.
    fn set(&self, key: &str, image: Arc<CachedImage>, cost: u64);

    /// Removes the entry for `key`.
    fn remove(&self, key: &str);

    /// Removes every entry.
    fn remove_all(&self);

    /// Returns the number of entries counted against the ceilings.
    fn len(&self) -> usize;

    /// Returns true if no entries are held.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the summed cost of held entries.
    fn total_cost(&self) -> u64;
}
