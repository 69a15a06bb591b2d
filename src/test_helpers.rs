//! Shared test utilities for the dropsize test suite.
//!
//! Provides an isolated directory layout and small file helpers for
//! tests that drive pipeline stages against a real filesystem.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let dirs = TestDirs::new();
//! write_file(&dirs.intake, "photo.jpg", b"bytes");
//! assert_eq!(file_names(&dirs.intake), vec!["photo.jpg"]);
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::config::DirectoriesConfig;

// =========================================================================
// Directory layout
// =========================================================================

/// Intake, working and output directories inside one temp dir.
///
/// Quarantine is not created up front; the pipeline creates it on demand.
pub struct TestDirs {
    _root: TempDir,
    pub intake: PathBuf,
    pub working: PathBuf,
    pub output: PathBuf,
    pub quarantine: PathBuf,
}

impl TestDirs {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        let intake = root.path().join("input");
        let working = root.path().join("processing");
        let output = root.path().join("output");
        let quarantine = root.path().join("quarantine");
        for dir in [&intake, &working, &output] {
            fs::create_dir_all(dir).unwrap();
        }
        Self {
            _root: root,
            intake,
            working,
            output,
            quarantine,
        }
    }

    pub fn directories(&self) -> DirectoriesConfig {
        DirectoriesConfig {
            intake: self.intake.clone(),
            working: self.working.clone(),
            output: self.output.clone(),
            quarantine: self.quarantine.clone(),
        }
    }
}

// =========================================================================
// File writers
// =========================================================================

pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes).unwrap();
    path
}

// =========================================================================
// Lookups
// =========================================================================

/// Sorted file names directly inside `dir`.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}
