//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the three codec operations the
//! pipeline delegates: decode, scale and compress. Stages only ever talk to
//! the trait, so the rest of the codebase is backend-agnostic.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the `image`
//! crate. Tests use the recording `MockBackend` in this module's tests.

use super::params::{CompressParams, ScaleParams};
use image::DynamicImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Trait for image processing backends.
///
/// Implementations must be `Sync`: stages call them from rayon workers.
/// A decoded [`DynamicImage`] owns its pixels, so every handle passed to
/// [`scale`](ImageBackend::scale) is independent of its siblings.
pub trait ImageBackend: Sync {
    /// Read and decode an image file.
    fn decode(&self, path: &Path) -> Result<DynamicImage, BackendError>;

    /// Resize so the longest edge does not exceed `params.max_edge`.
    fn scale(&self, image: DynamicImage, params: &ScaleParams)
    -> Result<DynamicImage, BackendError>;

    /// Encode an image into the bytes of the target format.
    fn compress(&self, image: &DynamicImage, params: &CompressParams)
    -> Result<Vec<u8>, BackendError>;
}
