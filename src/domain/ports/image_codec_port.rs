//! Port definition for image decoding and encoding.

use crate::domain::entities::{CachedImage, QueryOptions};

/// Converts between encoded bytes and decoded images.
#[cfg_attr(test, mockall::automock)]
pub trait ImageCodecPort: Send + Sync {
    /// Decodes `data`, honouring the decode-related bits of `options`.
    /// Returns `None` for malformed data.
    fn decode(&self, data: &[u8], options: QueryOptions) -> Option<CachedImage>;

    /// Encodes `image` for persistence.
    fn encode(&self, image: &CachedImage) -> Option<Vec<u8>>;
}
