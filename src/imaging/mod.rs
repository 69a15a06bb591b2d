//! Codec collaborators: decode, scale, compress and format conversion.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Decode** | `image::ImageReader` |
//! | **Scale** | Lanczos3, longest-edge bound, never enlarges |
//! | **Compress** | `image` codecs for JPEG, PNG, WebP, AVIF |
//! | **Convert HEIC** | external `magick` over stdin/stdout |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Converter**: [`FormatConverter`] trait + [`MagickConverter`]

pub mod backend;
mod calculations;
pub mod converter;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, ImageBackend};
pub use calculations::{fit_within, needs_scaling};
pub use converter::{FormatConverter, MagickConverter};
pub use params::{CompressParams, OutputFormat, Quality, ScaleParams};
pub use rust_backend::RustBackend;
