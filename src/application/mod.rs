//! Application layer with services composed from infrastructure adapters.

/// Application services.
pub mod services;

pub use services::ImageLoader;
