//! The staged transformation from intake files to published variants.
//!
//! ```text
//! normalize   intake/*.HEIC  →  working/*.HEIC.jpg (external converter)
//! relocate    intake/*.jpg   →  working/*.jpg      (copy, sync, delete)
//! process     working/*      →  output/*_<w>.ext   (fan-out, scale, compress, publish)
//! ```
//!
//! A [`Pipeline`] is an ordered list of [`Stage`]s, each a plain function
//! `(&StageEnv, RunContext) -> RunContext`. Stages run one after another:
//! every stage collects its parallel work before returning, so the next
//! stage never sees a half-finished directory.
//!
//! Inside a stage, files are independent. A failure is recorded in the
//! [`RunContext`] and the stage moves on; nothing short of a panic aborts a
//! batch. Files that keep failing are handed to [`quarantine`].

pub mod encode;
pub mod fanout;
pub mod normalize;
pub mod publish;
pub mod quarantine;
pub mod relocate;

use crate::config::RunConfig;
use crate::imaging::{BackendError, FormatConverter, ImageBackend, OutputFormat};
use crate::naming::parse_file_name;
use image::DynamicImage;
use quarantine::RetryLedger;
use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("converting {path} failed: {source}")]
    Conversion { path: PathBuf, source: BackendError },
    #[error("relocating {path} failed: {source}")]
    Relocate {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("decoding {path} failed: {source}")]
    Decode { path: PathBuf, source: BackendError },
    #[error("scaling/compressing {path} at {width}px failed: {source}")]
    ScaleCompress {
        path: PathBuf,
        width: u32,
        source: BackendError,
    },
    #[error("publishing {file_name} failed: {source}")]
    Publish {
        file_name: String,
        source: std::io::Error,
    },
    #[error("{path} would overwrite {existing}")]
    Collision { path: PathBuf, existing: PathBuf },
    #[error("removing {path} failed: {source}")]
    Cleanup {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Data model
// =============================================================================

/// Where a source file currently sits in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStage {
    Intake,
    Normalizing,
    Working,
    FanningOut,
    Done,
    Failed,
}

/// One file owned by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceImage {
    pub path: PathBuf,
    /// Lowercased extension of the file as found.
    pub original_format: String,
    pub stage: SourceStage,
}

impl SourceImage {
    pub fn new(path: impl Into<PathBuf>, stage: SourceStage) -> Self {
        let path = path.into();
        let original_format = parse_file_name(&file_name_of(&path))
            .extension
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        Self {
            path,
            original_format,
            stage,
        }
    }

    pub fn file_name(&self) -> String {
        file_name_of(&self.path)
    }

    pub fn stem(&self) -> String {
        parse_file_name(&self.file_name()).stem
    }
}

/// One size-tagged copy of a decoded source, produced by fan-out.
///
/// `image` is an independent deep copy; scaling it never affects siblings.
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// Back-reference to the source file, for reporting only.
    pub source: PathBuf,
    pub stem: String,
    pub image: DynamicImage,
    pub target_width: u32,
    pub format: OutputFormat,
}

/// Encoded bytes for one (source, width) pair, ready to publish.
#[derive(Debug, Clone)]
pub struct EncodedArtifact {
    pub source: PathBuf,
    pub stem: String,
    pub target_width: u32,
    pub format: OutputFormat,
    pub bytes: Vec<u8>,
}

impl EncodedArtifact {
    /// Published name: sanitized stem, width suffix, format extension.
    pub fn file_name(&self) -> String {
        crate::naming::variant_file_name(&self.stem, self.target_width, self.format)
    }
}

/// A per-file failure as it appears in the run summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub stage: String,
    pub file: String,
    pub message: String,
}

/// State threaded through the stages of one run.
///
/// Serializes to the JSON summary printed by `run --json`.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunContext {
    /// Proprietary files converted into working, by staged name.
    pub converted: Vec<String>,
    /// Files moved from intake into working.
    pub relocated: Vec<String>,
    /// Sources handled by the process stage, with their final stage.
    pub sources: Vec<SourceImage>,
    /// Output file names written this run.
    pub published: Vec<String>,
    /// Sources dropped because no target widths are configured.
    pub dropped: Vec<String>,
    /// Files moved to the quarantine directory.
    pub quarantined: Vec<String>,
    pub failures: Vec<FailureRecord>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&mut self, stage: StageKind, file: &Path, error: &PipelineError) {
        self.failures.push(FailureRecord {
            stage: stage.name().to_string(),
            file: file_name_of(file),
            message: error.to_string(),
        });
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Track `source`, replacing the entry an earlier stage left at the same path.
    pub fn track_source(&mut self, source: SourceImage) {
        match self.sources.iter_mut().find(|s| s.path == source.path) {
            Some(existing) => *existing = source,
            None => self.sources.push(source),
        }
    }
}

// =============================================================================
// Events
// =============================================================================

/// Progress notifications for the console.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    RunStarted {
        run: u64,
    },
    StageStarted {
        stage: StageKind,
    },
    Converted {
        source: String,
        staged: String,
    },
    Relocated {
        file: String,
    },
    Published {
        source: String,
        file: String,
        width: u32,
    },
    /// Working source fully published and removed.
    Purged {
        source: String,
    },
    /// Source dropped because the width list is empty.
    NoSizes {
        source: String,
    },
    Failed {
        stage: StageKind,
        file: String,
        message: String,
    },
    Quarantined {
        file: String,
        attempts: u32,
    },
    RunFinished {
        run: u64,
        published: usize,
        failed: usize,
    },
    /// A trigger arrived during a run and will start another run afterwards.
    TriggerQueued,
}

// =============================================================================
// Stages
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Normalize,
    Relocate,
    Process,
}

impl StageKind {
    pub fn name(self) -> &'static str {
        match self {
            StageKind::Normalize => "normalize",
            StageKind::Relocate => "relocate",
            StageKind::Process => "process",
        }
    }
}

/// Everything a stage may use. Borrowed for the duration of one run.
pub struct StageEnv<'a> {
    pub config: &'a RunConfig,
    pub backend: &'a dyn ImageBackend,
    pub converter: &'a dyn FormatConverter,
    pub ledger: &'a RetryLedger,
    pub pool: &'a rayon::ThreadPool,
    pub events: Option<&'a Sender<RunEvent>>,
}

impl StageEnv<'_> {
    /// Send a progress event if anyone is listening.
    pub fn emit(&self, event: RunEvent) {
        if let Some(tx) = self.events {
            // A closed printer must not stop the pipeline.
            let _ = tx.send(event);
        }
    }

    pub(crate) fn fail(&self, ctx: &mut RunContext, stage: StageKind, file: &Path, error: &PipelineError) {
        log::warn!("{}: {}", stage.name(), error);
        ctx.record_failure(stage, file, error);
        self.emit(RunEvent::Failed {
            stage,
            file: file_name_of(file),
            message: error.to_string(),
        });
    }
}

pub type StageFn = fn(&StageEnv<'_>, RunContext) -> RunContext;

/// A named step of the pipeline.
#[derive(Clone, Copy)]
pub struct Stage {
    pub kind: StageKind,
    pub run: StageFn,
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage").field("kind", &self.kind).finish()
    }
}

/// Ordered stages executed with a barrier between each.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// `normalize → relocate → process`.
    pub fn standard() -> Self {
        Self::new(vec![
            Stage {
                kind: StageKind::Normalize,
                run: normalize::normalize_stage,
            },
            Stage {
                kind: StageKind::Relocate,
                run: relocate::relocate_stage,
            },
            Stage {
                kind: StageKind::Process,
                run: process_stage,
            },
        ])
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Run every stage in order. `before_stage` is called as each one starts.
    pub fn run(
        &self,
        env: &StageEnv<'_>,
        mut ctx: RunContext,
        mut before_stage: impl FnMut(StageKind),
    ) -> RunContext {
        for stage in &self.stages {
            before_stage(stage.kind);
            env.emit(RunEvent::StageStarted { stage: stage.kind });
            log::info!("stage {} started", stage.kind.name());
            ctx = (stage.run)(env, ctx);
            log::debug!("stage {} finished", stage.kind.name());
        }
        ctx
    }
}

/// Per-source result of the process stage.
struct SourceOutcome {
    source: SourceImage,
    published: Vec<String>,
    failures: Vec<PipelineError>,
    dropped: bool,
}

/// Fan out, scale, compress and publish every working-directory source.
pub fn process_stage(env: &StageEnv<'_>, mut ctx: RunContext) -> RunContext {
    let config = env.config;
    let working = &config.directories.working;
    let sources = match list_files(working, |p| config.working_pattern.matches_path(p)) {
        Ok(s) => s,
        Err(e) => {
            env.fail(&mut ctx, StageKind::Process, working, &e.into());
            return ctx;
        }
    };
    if sources.is_empty() {
        return ctx;
    }
    log::info!("processing {} source(s) into {} width(s)", sources.len(), config.widths.len());

    let outcomes: Vec<SourceOutcome> =
        env.pool.install(|| sources.par_iter().map(|p| process_source(env, p)).collect());

    for outcome in outcomes {
        let path = outcome.source.path.clone();
        ctx.published.extend(outcome.published);
        if outcome.dropped {
            ctx.dropped.push(outcome.source.file_name());
        }
        let failed = !outcome.failures.is_empty();
        for error in &outcome.failures {
            env.fail(&mut ctx, StageKind::Process, &path, error);
        }
        ctx.track_source(outcome.source);
        if failed {
            quarantine::handle_failure(env, &mut ctx, &path);
        } else {
            env.ledger.clear(&path);
        }
    }
    ctx
}

fn process_source(env: &StageEnv<'_>, path: &Path) -> SourceOutcome {
    let config = env.config;
    let mut outcome = SourceOutcome {
        source: SourceImage::new(path, SourceStage::Working),
        published: Vec::new(),
        failures: Vec::new(),
        dropped: false,
    };

    let image = match env.backend.decode(path) {
        Ok(image) => image,
        Err(e) => {
            outcome.failures.push(PipelineError::Decode {
                path: path.to_path_buf(),
                source: e,
            });
            outcome.source.stage = SourceStage::Failed;
            return outcome;
        }
    };

    outcome.source.stage = SourceStage::FanningOut;
    let items = fanout::fan_out(&outcome.source, image, &config.widths, config.output_format);
    if items.is_empty() {
        log::warn!(
            "no target widths configured, dropping {}",
            outcome.source.file_name()
        );
        env.emit(RunEvent::NoSizes {
            source: outcome.source.file_name(),
        });
        outcome.dropped = true;
        purge(env, &outcome.source);
        outcome.source.stage = SourceStage::Done;
        return outcome;
    }

    let results: Vec<Result<EncodedArtifact, PipelineError>> = items
        .into_par_iter()
        .map(|item| encode::encode_item(env.backend, item, config.quality))
        .collect();

    for result in results {
        let published = result.and_then(|artifact| {
            publish::publish_artifact(&config.directories.output, &artifact)
                .map(|written| (artifact, written))
        });
        match published {
            Ok((artifact, written)) => {
                let file = file_name_of(&written);
                log::debug!("published {}", written.display());
                env.emit(RunEvent::Published {
                    source: outcome.source.file_name(),
                    file: file.clone(),
                    width: artifact.target_width,
                });
                outcome.published.push(file);
            }
            Err(e) => outcome.failures.push(e),
        }
    }

    if outcome.failures.is_empty() {
        purge(env, &outcome.source);
        outcome.source.stage = SourceStage::Done;
    } else {
        outcome.source.stage = SourceStage::Failed;
    }
    outcome
}

fn purge(env: &StageEnv<'_>, source: &SourceImage) {
    match publish::purge_source(&source.path) {
        Ok(()) => env.emit(RunEvent::Purged {
            source: source.file_name(),
        }),
        Err(e) => log::debug!("ignoring cleanup failure: {e}"),
    }
}

// =============================================================================
// Filesystem helpers
// =============================================================================

pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Regular files directly inside `dir` accepted by `keep`, sorted by name.
///
/// A missing directory has no files.
pub fn list_files(dir: &Path, keep: impl Fn(&Path) -> bool) -> std::io::Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(std::io::Error::other)?;
        if entry.file_type().is_file() && keep(entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Write `bytes` to `dest` so that it is complete and on disk before it
/// becomes visible under its final name.
pub fn write_durably(dest: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let tmp = dir.join(format!(".{}.tmp", file_name_of(dest)));
    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, dest)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Whether the next run would find anything to do.
pub fn has_pending_work(config: &RunConfig) -> std::io::Result<bool> {
    let dirs = &config.directories;
    let intake = list_files(&dirs.intake, |p| {
        config.input_pattern.matches_path(p)
            || normalize::is_proprietary(p, &config.normalize.extensions)
    })?;
    if !intake.is_empty() {
        return Ok(true);
    }
    let working = list_files(&dirs.working, |p| config.working_pattern.matches_path(p))?;
    Ok(!working.is_empty())
}
