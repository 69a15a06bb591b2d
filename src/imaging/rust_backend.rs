//! Pure Rust image processing backend.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP) | `image::ImageReader` with content sniffing |
//! | Scale | `DynamicImage::resize` with `Lanczos3` filter |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` |
//! | Encode → PNG | `image::codecs::png::PngEncoder` (best compression, adaptive filter) |
//! | Encode → WebP | `image::codecs::webp::WebPEncoder` (lossless) |
//! | Encode → AVIF | `image::codecs::avif::AvifEncoder` (rav1e, speed 6) |

use super::backend::{BackendError, ImageBackend};
use super::calculations::needs_scaling;
use super::params::{CompressParams, OutputFormat, ScaleParams};
use image::codecs::png::{CompressionType, FilterType as PngFilter};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageReader};
use std::path::Path;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_failed(format: OutputFormat, e: image::ImageError) -> BackendError {
    BackendError::ProcessingFailed(format!("{format} encode failed: {e}"))
}

/// Encode into an in-memory buffer for the requested format.
fn encode(image: &DynamicImage, params: &CompressParams) -> Result<Vec<u8>, BackendError> {
    let mut buf = Vec::new();
    let quality = params.quality.value() as u8;
    match params.format {
        OutputFormat::Jpeg => {
            // JPEG has no alpha channel
            let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
            rgb.write_with_encoder(encoder)
                .map_err(|e| encode_failed(params.format, e))?;
        }
        OutputFormat::Png => {
            let encoder = image::codecs::png::PngEncoder::new_with_quality(
                &mut buf,
                CompressionType::Best,
                PngFilter::Adaptive,
            );
            image
                .write_with_encoder(encoder)
                .map_err(|e| encode_failed(params.format, e))?;
        }
        OutputFormat::Webp => {
            let rgba = DynamicImage::ImageRgba8(image.to_rgba8());
            let encoder = image::codecs::webp::WebPEncoder::new_lossless(&mut buf);
            rgba.write_with_encoder(encoder)
                .map_err(|e| encode_failed(params.format, e))?;
        }
        OutputFormat::Avif => {
            let encoder =
                image::codecs::avif::AvifEncoder::new_with_speed_quality(&mut buf, 6, quality);
            image
                .write_with_encoder(encoder)
                .map_err(|e| encode_failed(params.format, e))?;
        }
    }
    Ok(buf)
}

impl ImageBackend for RustBackend {
    fn decode(&self, path: &Path) -> Result<DynamicImage, BackendError> {
        ImageReader::open(path)
            .map_err(BackendError::Io)?
            .with_guessed_format()
            .map_err(BackendError::Io)?
            .decode()
            .map_err(|e| {
                BackendError::ProcessingFailed(format!(
                    "Failed to decode {}: {}",
                    path.display(),
                    e
                ))
            })
    }

    fn scale(
        &self,
        image: DynamicImage,
        params: &ScaleParams,
    ) -> Result<DynamicImage, BackendError> {
        if params.max_edge == 0 {
            return Err(BackendError::ProcessingFailed(
                "scale target must be positive".into(),
            ));
        }
        if !needs_scaling(image.dimensions(), params.max_edge) {
            return Ok(image);
        }
        Ok(image.resize(params.max_edge, params.max_edge, FilterType::Lanczos3))
    }

    fn compress(
        &self,
        image: &DynamicImage,
        params: &CompressParams,
    ) -> Result<Vec<u8>, BackendError> {
        encode(image, params)
    }
}
