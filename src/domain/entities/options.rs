//! Option bitmasks for queries and disk access.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Per-call query behaviour.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct QueryOptions: u32 {
        /// On a memory hit, also read the encoded data from disk.
        const QUERY_MEMORY_DATA = 1 << 0;
        /// Read that memory-hit data synchronously.
        const QUERY_MEMORY_DATA_SYNC = 1 << 1;
        /// Read the disk tier synchronously on the caller's thread.
        const QUERY_DISK_DATA_SYNC = 1 << 2;
        /// Downscale images whose decoded pixels exceed the large-image threshold.
        const SCALE_DOWN_LARGE_IMAGES = 1 << 3;
        /// Return encoded data only, skipping decode.
        const AVOID_DECODE_IMAGE = 1 << 4;
        /// Decode only the first frame of animated formats.
        const DECODE_FIRST_FRAME_ONLY = 1 << 5;
        /// Decode every frame of animated formats up front.
        const PRELOAD_ALL_FRAMES = 1 << 6;
        /// Only animated images count as hits.
        const MATCH_ANIMATED_IMAGE_CLASS = 1 << 7;
    }
}

bitflags! {
    /// Disk read behaviour.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct DiskReadOptions: u32 {
        /// Stamp the access time on every successful read.
        const TOUCH_ACCESS_TIME = 1 << 0;
    }
}

bitflags! {
    /// Disk write behaviour.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct DiskWriteOptions: u32 {
        /// Write to a temporary file and rename it into place.
        const ATOMIC = 1 << 0;
        /// Leave an existing file untouched.
        const WITHOUT_OVERWRITING = 1 << 1;
    }
}

impl Default for DiskWriteOptions {
    fn default() -> Self {
        Self::ATOMIC
    }
}

/// Decoded pixel bytes above which `SCALE_DOWN_LARGE_IMAGES` applies (60 MiB).
pub const LARGE_IMAGE_PIXEL_BYTES: u64 = 60 * 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert!(QueryOptions::default().is_empty());
        assert!(DiskReadOptions::default().is_empty());
        assert_eq!(DiskWriteOptions::default(), DiskWriteOptions::ATOMIC);
    }

    #[test]
    fn test_options_compose() {
        let opts = QueryOptions::QUERY_DISK_DATA_SYNC | QueryOptions::AVOID_DECODE_IMAGE;
        assert!(opts.contains(QueryOptions::AVOID_DECODE_IMAGE));
        assert!(!opts.contains(QueryOptions::QUERY_MEMORY_DATA));
    }
}
