//! Domain types for cached images and query results.

use std::sync::Arc;

use bytes::Bytes;
use image::{DynamicImage, Frame, GenericImageView, ImageFormat};
use serde::{Deserialize, Serialize};

use super::CacheKey;

/// A decoded image as held by the memory tier.
///
/// Static images carry only `image`. Animated images additionally carry every
/// decoded frame; `image` is then the first frame.
#[derive(Clone)]
pub struct CachedImage {
    image: DynamicImage,
    frames: Vec<Frame>,
    format: Option<ImageFormat>,
}

impl std::fmt::Debug for CachedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedImage")
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .field("frames", &self.frames.len())
            .field("format", &self.format)
            .finish()
    }
}

impl CachedImage {
    /// Wraps a static image.
    #[must_use]
    pub fn new(image: DynamicImage) -> Self {
        Self {
            image,
            frames: Vec::new(),
            format: None,
        }
    }

    /// Wraps an animated image. The first frame becomes the poster image.
    ///
    /// Returns `None` when `frames` is empty.
    #[must_use]
    pub fn animated(frames: Vec<Frame>, format: Option<ImageFormat>) -> Option<Self> {
        let first = frames.first()?.buffer().clone();
        Some(Self {
            image: DynamicImage::ImageRgba8(first),
            frames,
            format,
        })
    }

    /// Sets the encoded format the image was decoded from.
    #[must_use]
    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Returns the (first frame) image.
    #[must_use]
    pub const fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// Returns all animation frames; empty for static images.
    #[must_use]
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Returns the source format when known.
    #[must_use]
    pub const fn format(&self) -> Option<ImageFormat> {
        self.format
    }

    /// Returns true if more than one frame was decoded.
    #[must_use]
    pub fn is_animated(&self) -> bool {
        self.frames.len() > 1
    }

    /// Returns the number of frames, at least one.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len().max(1)
    }

    /// Image width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Image height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Decoded pixel bytes, the weight used against the memory cost ceiling.
    #[must_use]
    pub fn cost(&self) -> u64 {
        if self.frames.is_empty() {
            let (w, h) = self.image.dimensions();
            let bpp = u64::from(self.image.color().bytes_per_pixel());
            return u64::from(w) * u64::from(h) * bpp;
        }
        self.frames
            .iter()
            .map(|frame| {
                let (w, h) = frame.buffer().dimensions();
                u64::from(w) * u64::from(h) * 4
            })
            .sum()
    }
}

/// Cache tier selector and hit indicator.
///
/// As a query argument it selects which tiers are consulted; in a result it
/// reports where the hit occurred (`None` on a miss).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    /// No tier.
    None,
    /// In-memory tier.
    Memory,
    /// On-disk tier.
    Disk,
    /// Memory first, then disk.
    #[default]
    All,
}

impl CacheType {
    /// Returns true if the memory tier is included.
    #[must_use]
    pub const fn includes_memory(self) -> bool {
        matches!(self, Self::Memory | Self::All)
    }

    /// Returns true if the disk tier is included.
    #[must_use]
    pub const fn includes_disk(self) -> bool {
        matches!(self, Self::Disk | Self::All)
    }
}

impl std::fmt::Display for CacheType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Memory => write!(f, "memory"),
            Self::Disk => write!(f, "disk"),
            Self::All => write!(f, "all"),
        }
    }
}

/// Outcome of a cache query.
#[derive(Debug, Clone, Default)]
pub struct CacheQueryResult {
    /// The decoded image, if any.
    pub image: Option<Arc<CachedImage>>,
    /// The encoded bytes, if read.
    pub data: Option<Bytes>,
    /// The tier that produced the hit.
    pub cache_type: CacheType,
}

impl CacheQueryResult {
    /// A miss.
    #[must_use]
    pub const fn miss() -> Self {
        Self {
            image: None,
            data: None,
            cache_type: CacheType::None,
        }
    }

    /// Returns true if either the image or its data was found.
    #[must_use]
    pub const fn is_hit(&self) -> bool {
        self.image.is_some() || self.data.is_some()
    }
}

/// Where an image was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Loaded from the in-memory cache.
    MemoryCache,
    /// Loaded from the disk cache.
    DiskCache,
    /// Downloaded from the network.
    Network,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::DiskCache => write!(f, "disk"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// A fully loaded image with source information.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// The cache key.
    pub key: CacheKey,
    /// The decoded image.
    pub image: Arc<CachedImage>,
    /// Where the image came from.
    pub source: ImageSource,
}
