//! Extension matching for intake and working files.
//!
//! An [`ExtensionPattern`] is built from the configured input types and
//! accepts a file name when its extension is one of them in all-lowercase or
//! all-uppercase form. Mixed case (`Photo.Jpg`) is rejected, matching the
//! `*.{jpg,JPG,png,PNG}` glob the pattern also renders for display.

use crate::config::ConfigError;
use regex::Regex;
use std::path::Path;

/// Compiled case-sensitive match over a set of extensions.
#[derive(Debug, Clone)]
pub struct ExtensionPattern {
    extensions: Vec<String>,
    regex: Regex,
}

impl ExtensionPattern {
    /// Build a pattern from extensions written without a leading dot.
    ///
    /// Fails with [`ConfigError::NoInputTypes`] if `extensions` is empty.
    pub fn new(extensions: &[String]) -> Result<Self, ConfigError> {
        let mut alternatives: Vec<String> = Vec::new();
        let mut normalized: Vec<String> = Vec::new();
        for ext in extensions {
            let ext = ext.trim().trim_start_matches('.');
            if ext.is_empty() {
                continue;
            }
            let lower = ext.to_lowercase();
            if normalized.contains(&lower) {
                continue;
            }
            let upper = ext.to_uppercase();
            alternatives.push(regex::escape(&lower));
            alternatives.push(regex::escape(&upper));
            normalized.push(lower);
        }
        if normalized.is_empty() {
            return Err(ConfigError::NoInputTypes);
        }

        let source = format!(r"^.+\.(?:{})$", alternatives.join("|"));
        let regex = Regex::new(&source)
            .map_err(|e| ConfigError::Validation(format!("invalid input type: {e}")))?;
        Ok(Self {
            extensions: normalized,
            regex,
        })
    }

    /// Lowercase extensions this pattern was built from, de-duplicated.
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn matches_name(&self, file_name: &str) -> bool {
        self.regex.is_match(file_name)
    }

    /// Match on the final path component only.
    ///
    /// Names that are not valid UTF-8 never match and are logged at debug.
    pub fn matches_path(&self, path: &Path) -> bool {
        let Some(name) = path.file_name() else {
            return false;
        };
        match name.to_str() {
            Some(name) => self.matches_name(name),
            None => {
                log::debug!("skipping non-UTF-8 file name {}", path.display());
                false
            }
        }
    }

    /// Glob rendering, e.g. `*.{jpg,JPG,png,PNG}`.
    pub fn glob(&self) -> String {
        let parts: Vec<String> = self
            .extensions
            .iter()
            .flat_map(|e| [e.clone(), e.to_uppercase()])
            .collect();
        format!("*.{{{}}}", parts.join(","))
    }
}
