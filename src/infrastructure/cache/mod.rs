//! Image cache infrastructure.
//!
//! This module provides:
//! - Memory caching with LRU eviction and weak retention
//! - Disk caching with age/size expiry
//! - A serial I/O queue that owns the disk tier
//! - The two-tier `ImageCache` and its lifecycle hooks

pub mod disk_cache;
pub mod image_cache;
pub mod io_queue;
pub mod lifecycle;
pub mod memory_cache;

pub use disk_cache::{CACHEDIR_TAG, DiskCache};
pub use image_cache::{
    AdditionalCachePath, ImageCache, default_disk_cache_directory,
    set_default_disk_cache_directory,
};
pub use io_queue::IoQueue;
pub use lifecycle::{LifecycleEvent, LifecycleNotifier, LifecycleSubscription};
pub use memory_cache::{CacheStats, MemoryCache};
