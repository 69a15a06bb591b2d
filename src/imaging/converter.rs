//! Proprietary-format conversion.
//!
//! HEIC/HEIF decoding is not available in pure Rust, so normalization shells
//! out to an external converter. [`FormatConverter`] is the seam: the
//! pipeline hands it the full source bytes and gets back the bytes of the
//! standard format.
//!
//! The production [`MagickConverter`] pipes through ImageMagick:
//!
//! ```text
//! magick - -quality 100 jpg:-
//! ```

use super::backend::BackendError;
use super::params::OutputFormat;
use std::io::Write;
use std::process::{Command, Stdio};

/// Converts an encoded image into another encoding.
pub trait FormatConverter: Sync {
    /// Convert `input` to `target`. `quality` is in `0.0..=1.0`.
    fn convert(
        &self,
        input: &[u8],
        target: OutputFormat,
        quality: f32,
    ) -> Result<Vec<u8>, BackendError>;
}

/// Map a `0.0..=1.0` quality onto the converter's 1-100 scale.
pub fn quality_percent(quality: f32) -> u32 {
    ((quality.clamp(0.0, 1.0) * 100.0).round() as u32).max(1)
}

/// Runs an ImageMagick-compatible executable with stdin/stdout pipes.
#[derive(Debug, Clone)]
pub struct MagickConverter {
    program: String,
}

impl MagickConverter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn args(target: OutputFormat, quality: f32) -> Vec<String> {
        vec![
            "-".to_string(),
            "-quality".to_string(),
            quality_percent(quality).to_string(),
            format!("{}:-", target.converter_name()),
        ]
    }
}

impl FormatConverter for MagickConverter {
    fn convert(
        &self,
        input: &[u8],
        target: OutputFormat,
        quality: f32,
    ) -> Result<Vec<u8>, BackendError> {
        let args = Self::args(target, quality);
        log::debug!("Running {} {:?}", self.program, args);

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                BackendError::ProcessingFailed(format!("Failed to start {}: {}", self.program, e))
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            BackendError::ProcessingFailed(format!("{} stdin unavailable", self.program))
        })?;

        // Feed stdin from a separate thread so a full stdout pipe cannot
        // deadlock the child.
        let (output, written) = std::thread::scope(|s| {
            let writer = s.spawn(move || {
                let result = stdin.write_all(input);
                drop(stdin);
                result
            });
            let output = child.wait_with_output();
            let written = writer.join().unwrap_or_else(|_| {
                Err(std::io::Error::other("stdin writer panicked"))
            });
            (output, written)
        });

        let output = output?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::ProcessingFailed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        // A converter may stop reading early and still succeed; only a write
        // failure combined with empty output is fatal.
        if output.stdout.is_empty() {
            written?;
            return Err(BackendError::ProcessingFailed(format!(
                "{} produced no output",
                self.program
            )));
        }
        Ok(output.stdout)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use std::sync::Mutex;

    /// Converter that ignores its input and produces a solid JPEG.
    ///
    /// Inputs starting with `CORRUPT` fail. Calls are recorded.
    pub struct MockConverter {
        pub width: u32,
        pub height: u32,
        pub calls: Mutex<Vec<(usize, OutputFormat, f32)>>,
    }

    impl MockConverter {
        pub fn new(width: u32, height: u32) -> Self {
            Self {
                width,
                height,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl FormatConverter for MockConverter {
        fn convert(
            &self,
            input: &[u8],
            target: OutputFormat,
            quality: f32,
        ) -> Result<Vec<u8>, BackendError> {
            self.calls
                .lock()
                .unwrap()
                .push((input.len(), target, quality));
            if input.starts_with(b"CORRUPT") {
                return Err(BackendError::ProcessingFailed("mock: corrupt input".into()));
            }
            let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(
                self.width,
                self.height,
                Rgb([200, 100, 50]),
            ));
            let mut bytes = Vec::new();
            img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
                .map_err(|e| BackendError::ProcessingFailed(e.to_string()))?;
            Ok(bytes)
        }
    }

    #[test]
    fn quality_percent_maps_unit_range() {
        assert_eq!(quality_percent(1.0), 100);
        assert_eq!(quality_percent(0.5), 50);
        assert_eq!(quality_percent(0.0), 1);
        assert_eq!(quality_percent(7.0), 100);
    }

    #[test]
    fn magick_args_use_stdin_and_stdout() {
        let args = MagickConverter::args(OutputFormat::Jpeg, 1.0);
        assert_eq!(args, vec!["-", "-quality", "100", "jpg:-"]);
    }

    #[test]
    fn missing_program_is_error() {
        let converter = MagickConverter::new("dropsize-no-such-converter");
        let result = converter.convert(b"anything", OutputFormat::Jpeg, 1.0);
        assert!(matches!(result, Err(BackendError::ProcessingFailed(msg)) if msg.contains("Failed to start")));
    }

    #[test]
    fn mock_converter_produces_jpeg() {
        let converter = MockConverter::new(40, 20);
        let bytes = converter
            .convert(b"HEICDATA", OutputFormat::Jpeg, 1.0)
            .unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (40, 20));
        assert_eq!(converter.call_count(), 1);
    }

    #[test]
    fn mock_converter_rejects_corrupt_input() {
        let converter = MockConverter::new(4, 4);
        assert!(converter
            .convert(b"CORRUPT!", OutputFormat::Jpeg, 1.0)
            .is_err());
    }
}
