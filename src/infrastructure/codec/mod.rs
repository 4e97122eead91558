//! Image decoding and encoding adapters.

pub mod image_codec;

pub use image_codec::ImageCrateCodec;
