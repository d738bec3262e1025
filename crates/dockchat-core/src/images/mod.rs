//! Inline image support: fetching, negative caching and width fitting.

pub mod cache;
pub mod scale;

pub use cache::{ImageFetchError, ImageResolution, ImageResourceCache};
pub use scale::Bitmap;
