//! Pipeline configuration.
//!
//! Loaded once at process start from a `config.toml` (path chosen on the
//! command line). The user file is merged over the stock defaults, rejected
//! if it carries unknown keys, and validated before anything touches the
//! filesystem.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! input_types = ["jpg", "jpeg", "png"]  # Extensions picked up from intake
//! output_type = "jpeg"                  # jpeg | png | webp | avif
//! quality = 80                          # Lossy quality (1-100)
//!
//! [directories]
//! intake = "input"
//! working = "processing"
//! output = "output"
//! quarantine = "quarantine"
//!
//! [[profiles]]
//! name = "thumbnail"
//! sizes = [160]
//!
//! [[profiles]]
//! name = "web"
//! sizes = [320, 1080]
//!
//! [selection]
//! mode = "static"                       # static | interactive
//! active = ["web"]
//!
//! [normalize]
//! extensions = ["heic", "heif"]         # Converted to JPEG before relocation
//! program = "magick"                    # External converter executable
//!
//! [retry]
//! max_attempts = 3                      # 0 = retry forever, never quarantine
//!
//! [processing]
//! max_processes = 4                     # Omit for auto = CPU cores
//!
//! [watch]
//! debounce_ms = 500
//! ```
//!
//! ## From `Config` to `RunConfig`
//!
//! [`Config`] mirrors the file. Once the active size profiles are known
//! (statically or from the interactive prompt), [`RunConfig::resolve`]
//! produces the immutable per-process [`RunConfig`] every stage receives.
//! Nothing downstream reads configuration from anywhere else.

use crate::imaging::{OutputFormat, Quality};
use crate::matching::ExtensionPattern;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error("input_types must list at least one extension")]
    NoInputTypes,
    #[error("at least one size profile must be selected")]
    EmptySelection,
    #[error("unknown size profile: {0}")]
    UnknownProfile(String),
}

/// Pipeline configuration as written in `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Accepted input extensions, lowercase, without the dot.
    pub input_types: Vec<String>,
    /// Encoding of every published variant.
    pub output_type: OutputFormat,
    /// Lossy encoding quality (1 = worst, 100 = best).
    pub quality: u32,
    pub directories: DirectoriesConfig,
    /// Named, ordered lists of target widths.
    pub profiles: Vec<SizeProfile>,
    pub selection: SelectionConfig,
    pub normalize: NormalizeConfig,
    pub retry: RetryConfig,
    pub processing: ProcessingConfig,
    pub watch: WatchConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_types: vec!["jpg".into(), "jpeg".into(), "png".into()],
            output_type: OutputFormat::Jpeg,
            quality: 80,
            directories: DirectoriesConfig::default(),
            profiles: vec![
                SizeProfile::new("thumbnail", vec![160]),
                SizeProfile::new("web", vec![320, 1080]),
                SizeProfile::new("retina", vec![2160]),
            ],
            selection: SelectionConfig::default(),
            normalize: NormalizeConfig::default(),
            retry: RetryConfig::default(),
            processing: ProcessingConfig::default(),
            watch: WatchConfig::default(),
        }
    }
}

impl Config {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input_types.is_empty() {
            return Err(ConfigError::NoInputTypes);
        }
        if self.input_types.iter().any(|t| t.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "input_types entries must not be blank".into(),
            ));
        }
        if !(1..=100).contains(&self.quality) {
            return Err(ConfigError::Validation("quality must be 1-100".into()));
        }
        let mut names = HashSet::new();
        for profile in &self.profiles {
            if !names.insert(profile.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate size profile '{}'",
                    profile.name
                )));
            }
            if profile.sizes.contains(&0) {
                return Err(ConfigError::Validation(format!(
                    "size profile '{}' contains a zero width",
                    profile.name
                )));
            }
        }
        for name in &self.selection.active {
            if !names.contains(name.as_str()) {
                return Err(ConfigError::UnknownProfile(name.clone()));
            }
        }
        if self.selection.mode == SelectionMode::Static && self.selection.active.is_empty() {
            return Err(ConfigError::EmptySelection);
        }
        if self.watch.debounce_ms == 0 {
            return Err(ConfigError::Validation(
                "watch.debounce_ms must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// The three pipeline directories plus the dead-letter directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DirectoriesConfig {
    /// Where new files are dropped.
    pub intake: PathBuf,
    /// Staging area between normalization and publishing.
    pub working: PathBuf,
    /// Final destination for encoded variants.
    pub output: PathBuf,
    /// Files that kept failing are moved here.
    pub quarantine: PathBuf,
}

impl Default for DirectoriesConfig {
    fn default() -> Self {
        Self {
            intake: PathBuf::from("input"),
            working: PathBuf::from("processing"),
            output: PathBuf::from("output"),
            quarantine: PathBuf::from("quarantine"),
        }
    }
}

/// A named, ordered list of target pixel widths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SizeProfile {
    pub name: String,
    pub sizes: Vec<u32>,
}

impl SizeProfile {
    pub fn new(name: impl Into<String>, sizes: Vec<u32>) -> Self {
        Self {
            name: name.into(),
            sizes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    /// Use `selection.active` as written.
    Static,
    /// Ask on the terminal at startup.
    Interactive,
}

/// Which size profiles are active for this process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelectionConfig {
    pub mode: SelectionMode,
    /// Profile names activated in static mode; preselected in interactive mode.
    pub active: Vec<String>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            mode: SelectionMode::Static,
            active: vec!["web".into()],
        }
    }
}

/// Proprietary-format conversion settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NormalizeConfig {
    /// Extensions (case-insensitive) converted before relocation.
    pub extensions: Vec<String>,
    /// Converter executable, invoked as `<program> - -quality N jpg:-`.
    pub program: String,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["heic".into(), "heif".into()],
            program: "magick".into(),
        }
    }
}

/// Dead-letter policy for files that keep failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Failed runs tolerated per file before it is quarantined.
    /// `0` retries forever.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel workers per stage.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

/// Filesystem watch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchConfig {
    /// Events closer together than this are delivered as one batch.
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: 500 }
    }
}

// =============================================================================
// Resolved per-process configuration
// =============================================================================

/// Immutable configuration for every run of this process.
///
/// Built once, after profile selection, and handed by reference to each
/// pipeline stage.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub directories: DirectoriesConfig,
    /// Files relocated from intake to working.
    pub input_pattern: ExtensionPattern,
    /// Files fanned out from working: input types plus the normalized format.
    pub working_pattern: ExtensionPattern,
    pub normalize: NormalizeConfig,
    pub output_format: OutputFormat,
    pub quality: Quality,
    /// Names of the selected profiles, in selection order.
    pub profiles: Vec<String>,
    /// Flattened, de-duplicated target widths of the selected profiles.
    pub widths: Vec<u32>,
    pub max_attempts: u32,
    pub threads: usize,
}

impl RunConfig {
    /// Resolve a validated [`Config`] plus the selected profile names.
    pub fn resolve(config: &Config, selected: &[String]) -> Result<Self, ConfigError> {
        config.validate()?;
        let widths = resolve_widths(&config.profiles, selected)?;

        let input_pattern = ExtensionPattern::new(&config.input_types)?;
        let mut working_types = config.input_types.clone();
        working_types.push(OutputFormat::Jpeg.extension().to_string());
        let working_pattern = ExtensionPattern::new(&working_types)?;

        Ok(Self {
            directories: config.directories.clone(),
            input_pattern,
            working_pattern,
            normalize: config.normalize.clone(),
            output_format: config.output_type,
            quality: Quality::new(config.quality),
            profiles: selected.to_vec(),
            widths,
            max_attempts: config.retry.max_attempts,
            threads: effective_threads(&config.processing),
        })
    }
}

/// Flatten the widths of the selected profiles into one ordered list.
///
/// Widths keep first-seen order across profiles; repeats are dropped so each
/// width yields exactly one variant. An empty selection is a configuration
/// error; a selection whose profiles carry no widths is not.
pub fn resolve_widths(profiles: &[SizeProfile], selected: &[String]) -> Result<Vec<u32>, ConfigError> {
    if selected.is_empty() {
        return Err(ConfigError::EmptySelection);
    }
    let mut widths = Vec::new();
    for name in selected {
        let profile = profiles
            .iter()
            .find(|p| &p.name == name)
            .ok_or_else(|| ConfigError::UnknownProfile(name.clone()))?;
        for &width in &profile.sizes {
            if width == 0 {
                return Err(ConfigError::Validation(format!(
                    "size profile '{}' contains a zero width",
                    profile.name
                )));
            }
            if !widths.contains(&width) {
                widths.push(width);
            }
        }
    }
    Ok(widths)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(Config::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely, so a user
///   `[[profiles]]` list replaces the stock profiles rather than extending them.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Merge an optional overlay onto the stock defaults, then deserialize and validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<Config, ConfigError> {
    let base = stock_defaults_value()?;
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: Config = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load the config file at `path`.
///
/// A missing file yields the stock defaults; an unreadable or invalid one
/// is an error.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        log::info!("{} not found, using stock configuration", path.display());
        return resolve_config(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    resolve_config(Some(value))
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# dropsize configuration
# ======================
# All settings are optional. Values shown below are the defaults.
# Unknown keys cause an error.

# Extensions picked up from the intake directory (lowercase, no dot).
# Both the lowercase and the all-uppercase spelling are accepted.
input_types = ["jpg", "jpeg", "png"]

# Encoding of every published variant: jpeg, png, webp or avif.
output_type = "jpeg"

# Lossy encoding quality (1 = worst, 100 = best). Ignored by png and webp.
quality = 80

# ---------------------------------------------------------------------------
# Directories (cleared on `watch` startup, except quarantine)
# ---------------------------------------------------------------------------
[directories]
intake = "input"
working = "processing"
output = "output"
quarantine = "quarantine"

# ---------------------------------------------------------------------------
# Size profiles: named lists of target widths (longest edge, in pixels).
# Declaring any [[profiles]] replaces this whole list.
# ---------------------------------------------------------------------------
[[profiles]]
name = "thumbnail"
sizes = [160]

[[profiles]]
name = "web"
sizes = [320, 1080]

[[profiles]]
name = "retina"
sizes = [2160]

# ---------------------------------------------------------------------------
# Profile selection
# ---------------------------------------------------------------------------
[selection]
# "static" uses `active` as written; "interactive" asks at startup.
mode = "static"
active = ["web"]

# ---------------------------------------------------------------------------
# Proprietary-format normalization
# ---------------------------------------------------------------------------
[normalize]
# Files with these extensions are converted to JPEG before relocation.
extensions = ["heic", "heif"]
# Converter executable. Reads the source on stdin, writes JPEG to stdout.
program = "magick"

# ---------------------------------------------------------------------------
# Retry / quarantine
# ---------------------------------------------------------------------------
[retry]
# Failed runs tolerated per file before it is moved to the quarantine
# directory. 0 retries forever.
max_attempts = 3

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel workers per stage.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4

# ---------------------------------------------------------------------------
# Watching
# ---------------------------------------------------------------------------
[watch]
# Filesystem events closer together than this form one trigger.
debounce_ms = 500
"##
}
