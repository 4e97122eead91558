mod disk_cache_port;
mod image_codec_port;
mod memory_cache_port;
mod transport_port;

pub use disk_cache_port::{CleanupReport, DiskCachePort};
pub use image_codec_port::ImageCodecPort;
pub use memory_cache_port::MemoryCachePort;
pub use transport_port::TransportPort;

#[cfg(test)]
pub mod mocks {
    pub use super::image_codec_port::MockImageCodecPort;
}
