//! Codec backed by the `image` crate.

use std::io::Cursor;

use image::codecs::gif::GifDecoder;
use image::imageops::FilterType;
use image::{AnimationDecoder, DynamicImage, GenericImageView, ImageFormat};
use tracing::{debug, warn};

use crate::domain::entities::{CachedImage, LARGE_IMAGE_PIXEL_BYTES, QueryOptions};
use crate::domain::ports::ImageCodecPort;

/// Decodes PNG, JPEG, WebP and GIF; encodes PNG.
///
/// Animated GIFs keep every frame unless `DECODE_FIRST_FRAME_ONLY` is set.
/// Frames are always decoded up front, so `PRELOAD_ALL_FRAMES` changes nothing here.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateCodec {
    pixel_budget: u64,
}

impl ImageCrateCodec {
    /// Creates a codec with the default 60 MiB scale-down budget.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pixel_budget: LARGE_IMAGE_PIXEL_BYTES,
        }
    }

    /// Overrides the decoded size above which `SCALE_DOWN_LARGE_IMAGES` shrinks images.
    #[must_use]
    pub const fn with_pixel_budget(mut self, bytes: u64) -> Self {
        self.pixel_budget = bytes;
        self
    }

    fn decode_frames(data: &[u8]) -> Option<CachedImage> {
        let decoder = GifDecoder::new(Cursor::new(data)).ok()?;
        let frames = match decoder.into_frames().collect_frames() {
            Ok(frames) => frames,
            Err(e) => {
                warn!(error = %e, "Failed to decode animation frames");
                return None;
            }
        };
        if frames.len() < 2 {
            return None;
        }
        CachedImage::animated(frames, Some(ImageFormat::Gif))
    }

    fn scale_down(&self, image: DynamicImage) -> DynamicImage {
        let (width, height) = image.dimensions();
        let bpp = u64::from(image.color().bytes_per_pixel());
        match scaled_dimensions(width, height, bpp, self.pixel_budget) {
            Some((w, h)) => {
                debug!(width, height, to_width = w, to_height = h, "Scaling down large image");
                image.resize(w, h, FilterType::Triangle)
            }
            None => image,
        }
    }
}

/// Target size keeping the aspect ratio so `w * h * bpp` fits in `budget`.
/// `None` when the image already fits.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn scaled_dimensions(width: u32, height: u32, bpp: u64, budget: u64) -> Option<(u32, u32)> {
    let bytes = u64::from(width) * u64::from(height) * bpp.max(1);
    if budget == 0 || bytes <= budget {
        return None;
    }
    let factor = (budget as f64 / bytes as f64).sqrt();
    let w = ((f64::from(width) * factor).floor() as u32).max(1);
    let h = ((f64::from(height) * factor).floor() as u32).max(1);
    Some((w, h))
}

impl ImageCodecPort for ImageCrateCodec {
    fn decode(&self, data: &[u8], options: QueryOptions) -> Option<CachedImage> {
        if data.is_empty() {
            return None;
        }
        let format = image::guess_format(data).ok();

        if format == Some(ImageFormat::Gif)
            && !options.contains(QueryOptions::DECODE_FIRST_FRAME_ONLY)
            && let Some(animated) = Self::decode_frames(data)
        {
            return Some(animated);
        }

        let image = match image::load_from_memory(data) {
            Ok(image) => image,
            Err(e) => {
                debug!(error = %e, size = data.len(), "Failed to decode image");
                return None;
            }
        };
        let image = if options.contains(QueryOptions::SCALE_DOWN_LARGE_IMAGES) {
            self.scale_down(image)
        } else {
            image
        };

        let cached = CachedImage::new(image);
        Some(match format {
            Some(format) => cached.with_format(format),
            None => cached,
        })
    }

    fn encode(&self, image: &CachedImage) -> Option<Vec<u8>> {
        let mut buf = Vec::new();
        match image
            .image()
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        {
            Ok(()) => Some(buf),
            Err(e) => {
                warn!(error = %e, "Failed to encode image");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::{Delay, Frame, Rgba, RgbaImage};

    fn gif_bytes(frames: usize) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut buf);
            for i in 0..frames {
                let shade = u8::try_from(i * 40).unwrap();
                let frame = Frame::from_parts(
                    RgbaImage::from_pixel(3, 3, Rgba([shade, 0, 0, 255])),
                    0,
                    0,
                    Delay::from_numer_denom_ms(50, 1),
                );
                encoder.encode_frame(frame).unwrap();
            }
        }
        buf
    }

    #[test]
    fn test_png_round_trip_keeps_dimensions() {
        let codec = ImageCrateCodec::new();
        let original = CachedImage::new(DynamicImage::new_rgba8(7, 3));
        let data = codec.encode(&original).unwrap();

        let decoded = codec.decode(&data, QueryOptions::empty()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (7, 3));
        assert_eq!(decoded.format(), Some(ImageFormat::Png));
        assert!(!decoded.is_animated());
    }

    #[test]
    fn test_garbage_is_not_decoded() {
        let codec = ImageCrateCodec::new();
        assert!(codec.decode(b"definitely not an image", QueryOptions::empty()).is_none());
        assert!(codec.decode(&[], QueryOptions::empty()).is_none());
    }

    #[test]
    fn test_gif_keeps_frames_by_default() {
        let codec = ImageCrateCodec::new();
        let data = gif_bytes(3);

        let animated = codec.decode(&data, QueryOptions::empty()).unwrap();
        assert!(animated.is_animated());
        assert_eq!(animated.frame_count(), 3);
        assert_eq!(animated.format(), Some(ImageFormat::Gif));

        let preloaded = codec.decode(&data, QueryOptions::PRELOAD_ALL_FRAMES).unwrap();
        assert_eq!(preloaded.frame_count(), 3);

        let first_only = codec
            .decode(
                &data,
                QueryOptions::PRELOAD_ALL_FRAMES | QueryOptions::DECODE_FIRST_FRAME_ONLY,
            )
            .unwrap();
        assert!(!first_only.is_animated());
        assert_eq!((first_only.width(), first_only.height()), (3, 3));
    }

    #[test]
    fn test_single_frame_gif_is_still() {
        let codec = ImageCrateCodec::new();
        let still = codec.decode(&gif_bytes(1), QueryOptions::empty()).unwrap();
        assert!(!still.is_animated());
        assert_eq!(still.format(), Some(ImageFormat::Gif));
    }

    #[test]
    fn test_scale_down_applies_only_with_option() {
        let codec = ImageCrateCodec::new().with_pixel_budget(100 * 100 * 4);
        let data = codec
            .encode(&CachedImage::new(DynamicImage::new_rgba8(400, 200)))
            .unwrap();

        let full = codec.decode(&data, QueryOptions::empty()).unwrap();
        assert_eq!(full.width(), 400);

        let scaled = codec
            .decode(&data, QueryOptions::SCALE_DOWN_LARGE_IMAGES)
            .unwrap();
        assert!(scaled.cost() <= 100 * 100 * 4);
        assert_eq!(scaled.width(), scaled.height() * 2);
    }

    #[test]
    fn test_scaled_dimensions() {
        assert_eq!(scaled_dimensions(10, 10, 4, 400), None);
        assert_eq!(scaled_dimensions(10, 10, 4, 0), None);
        assert_eq!(scaled_dimensions(20, 20, 4, 400), Some((10, 10)));
        assert_eq!(scaled_dimensions(64, 16, 4, 256), Some((16, 4)));
        assert_eq!(scaled_dimensions(4096, 1, 1, 1), Some((64, 1)));
    }
}
