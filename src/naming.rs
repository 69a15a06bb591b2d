//! Centralized filename handling for every file the pipeline writes.
//!
//! Three conventions live here so stages never format paths by hand:
//!
//! - Normalized sources keep their full name and gain the standard
//!   extension: `IMG 0001.HEIC` → `IMG 0001.HEIC.jpg`. A converted HEIC can
//!   then never share a name with a JPEG of the same stem.
//! - Published variants get a width suffix: `IMG 0001.jpg` at 320px →
//!   `IMG_0001_320.jpg`, and `IMG 0001.HEIC.jpg` → `IMG_0001.HEIC_320.jpg`
//! - Spaces in the stem become underscores; the extension and the width
//!   suffix are never touched.

use crate::imaging::OutputFormat;

/// Result of splitting a file name like `My Photo.JPG`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedName {
    /// Everything before the last dot. For dotfiles, the full name.
    pub stem: String,
    /// Extension without the dot, case preserved.
    pub extension: Option<String>,
}

/// Split a file name on its last dot.
///
/// - `"photo.jpg"` → stem="photo", extension=Some("jpg")
/// - `"archive.tar.gz"` → stem="archive.tar", extension=Some("gz")
/// - `"README"` → stem="README", extension=None
/// - `".hidden"` → stem=".hidden", extension=None
pub fn parse_file_name(name: &str) -> ParsedName {
    match name.rfind('.') {
        Some(pos) if pos > 0 && pos + 1 < name.len() => ParsedName {
            stem: name[..pos].to_string(),
            extension: Some(name[pos + 1..].to_string()),
        },
        _ => ParsedName {
            stem: name.to_string(),
            extension: None,
        },
    }
}

/// Replace every space in a stem with an underscore.
pub fn sanitize_stem(stem: &str) -> String {
    stem.replace(' ', "_")
}

/// Name of a published variant: sanitized stem, width suffix, format extension.
///
/// ```
/// # use dropsize::naming::variant_file_name;
/// # use dropsize::imaging::OutputFormat;
/// assert_eq!(variant_file_name("My Photo 2", 320, OutputFormat::Jpeg), "My_Photo_2_320.jpg");
/// ```
pub fn variant_file_name(stem: &str, width: u32, format: OutputFormat) -> String {
    format!("{}_{}.{}", sanitize_stem(stem), width, format.extension())
}

/// Name a converted source is staged under: the original name plus the
/// new extension.
pub fn normalized_file_name(original: &str, format: OutputFormat) -> String {
    format!("{}.{}", original, format.extension())
}

/// `name` with `-n` inserted before its extension: `a.heic`, 2 → `a-2.heic`.
pub fn numbered_file_name(name: &str, n: u32) -> String {
    let parsed = parse_file_name(name);
    match parsed.extension {
        Some(ext) => format!("{}-{}.{}", parsed.stem, n, ext),
        None => format!("{}-{}", parsed.stem, n),
    }
}

/// Whether `name` has one of `extensions`, compared case-insensitively.
pub fn has_extension_in(name: &str, extensions: &[String]) -> bool {
    parse_file_name(name)
        .extension
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)))
}
