//! Process-wide run coordination.
//!
//! The [`Coordinator`] owns the directory lifecycle and serializes pipeline
//! runs:
//!
//! ```text
//! Idle ──start──▶ Clearing ──▶ Watching ──trigger──▶ Normalizing
//!                                 ▲                      │
//!                                 │                      ▼
//!                                 └──── Processing ◀── Relocating
//! ```
//!
//! Only one run executes at a time. A trigger that arrives while a run is in
//! progress sets a pending flag and returns immediately; the running caller
//! performs exactly one more run after its final stage, however many
//! triggers arrived meanwhile. Runs therefore never interleave on the
//! working directory.

use crate::config::RunConfig;
use crate::imaging::{FormatConverter, ImageBackend};
use crate::pipeline::quarantine::RetryLedger;
use crate::pipeline::{Pipeline, RunContext, RunEvent, StageEnv, StageKind, has_pending_work};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("preparing {path} failed: {source}")]
    Prepare {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("clearing {path} failed: {source}")]
    Clear {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("thread pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CoordinatorState {
    Idle,
    Clearing,
    Watching,
    Normalizing,
    Relocating,
    Processing,
}

impl From<StageKind> for CoordinatorState {
    fn from(kind: StageKind) -> Self {
        match kind {
            StageKind::Normalize => CoordinatorState::Normalizing,
            StageKind::Relocate => CoordinatorState::Relocating,
            StageKind::Process => CoordinatorState::Processing,
        }
    }
}

/// Result of one call to [`Coordinator::trigger`].
#[derive(Debug)]
pub enum TriggerOutcome {
    /// This caller ran the pipeline; one context per run performed.
    Completed(Vec<RunContext>),
    /// Another run was in progress; it will run again when done.
    Queued,
    /// Nothing to process.
    Skipped,
}

#[derive(Debug, Default)]
struct RunSlot {
    running: bool,
    pending: bool,
}

pub struct Coordinator {
    config: RunConfig,
    pipeline: Pipeline,
    backend: Box<dyn ImageBackend>,
    converter: Box<dyn FormatConverter>,
    ledger: RetryLedger,
    pool: rayon::ThreadPool,
    events: Option<Sender<RunEvent>>,
    state: Mutex<CoordinatorState>,
    slot: Mutex<RunSlot>,
    runs: AtomicU64,
}

impl Coordinator {
    /// Build a coordinator with the standard pipeline and a worker pool
    /// sized by `config.threads`.
    pub fn new(
        config: RunConfig,
        backend: Box<dyn ImageBackend>,
        converter: Box<dyn FormatConverter>,
    ) -> Result<Self, CoordinatorError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|i| format!("dropsize-worker-{i}"))
            .build()?;
        let ledger = RetryLedger::new(config.max_attempts);
        Ok(Self {
            config,
            pipeline: Pipeline::standard(),
            backend,
            converter,
            ledger,
            pool,
            events: None,
            state: Mutex::new(CoordinatorState::Idle),
            slot: Mutex::new(RunSlot::default()),
            runs: AtomicU64::new(0),
        })
    }

    pub fn with_events(mut self, events: Sender<RunEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn state(&self) -> CoordinatorState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: CoordinatorState) {
        log::debug!("state -> {state:?}");
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Create any missing pipeline directory. Existing contents are kept.
    pub fn prepare_directories(&self) -> Result<(), CoordinatorError> {
        let dirs = &self.config.directories;
        for dir in [&dirs.intake, &dirs.working, &dirs.output] {
            fs::create_dir_all(dir).map_err(|source| CoordinatorError::Prepare {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Empty the intake, working and output directories.
    ///
    /// Destructive: everything inside them is deleted. The quarantine
    /// directory is left alone.
    pub fn clear_directories(&self) -> Result<(), CoordinatorError> {
        self.prepare_directories()?;
        let dirs = &self.config.directories;
        for dir in [&dirs.intake, &dirs.working, &dirs.output] {
            clear_dir(dir).map_err(|source| CoordinatorError::Clear {
                path: dir.clone(),
                source,
            })?;
            log::info!("cleared {}", dir.display());
        }
        Ok(())
    }

    /// `Idle → Clearing → Watching`.
    pub fn start(&self) -> Result<(), CoordinatorError> {
        self.set_state(CoordinatorState::Clearing);
        if let Err(e) = self.clear_directories() {
            self.set_state(CoordinatorState::Idle);
            return Err(e);
        }
        self.set_state(CoordinatorState::Watching);
        Ok(())
    }

    /// Run the pipeline, or queue a run if one is already in progress.
    pub fn trigger(&self) -> TriggerOutcome {
        {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.running {
                slot.pending = true;
                log::debug!("run in progress, trigger queued");
                self.emit(RunEvent::TriggerQueued);
                return TriggerOutcome::Queued;
            }
            slot.running = true;
        }

        let resting = self.state();
        let mut completed = Vec::new();
        loop {
            if let Some(ctx) = self.run_once() {
                completed.push(ctx);
            }
            self.set_state(resting);

            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.pending {
                slot.pending = false;
                continue;
            }
            slot.running = false;
            break;
        }

        if completed.is_empty() {
            TriggerOutcome::Skipped
        } else {
            TriggerOutcome::Completed(completed)
        }
    }

    fn run_once(&self) -> Option<RunContext> {
        match has_pending_work(&self.config) {
            Ok(true) => {}
            Ok(false) => {
                log::debug!("trigger skipped, nothing to process");
                return None;
            }
            Err(e) => log::warn!("could not inspect directories, running anyway: {e}"),
        }

        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        log::info!("run {run} started");
        self.emit(RunEvent::RunStarted { run });

        let env = StageEnv {
            config: &self.config,
            backend: self.backend.as_ref(),
            converter: self.converter.as_ref(),
            ledger: &self.ledger,
            pool: &self.pool,
            events: self.events.as_ref(),
        };
        let ctx = self
            .pipeline
            .run(&env, RunContext::new(), |kind| self.set_state(kind.into()));

        log::info!(
            "run {run} finished: {} published, {} failed",
            ctx.published.len(),
            ctx.failures.len()
        );
        self.emit(RunEvent::RunFinished {
            run,
            published: ctx.published.len(),
            failed: ctx.failures.len(),
        });
        Some(ctx)
    }

    /// Trigger once per batch of filesystem changes until `batches` closes.
    ///
    /// Batches already waiting when a run finishes are folded into one
    /// trigger. Only paths that still exist count: the removals a run causes
    /// itself while relocating come back as batches and must not start
    /// another run.
    pub fn serve(&self, batches: Receiver<Vec<PathBuf>>) {
        while let Ok(batch) = batches.recv() {
            let mut paths = batch;
            for more in batches.try_iter() {
                paths.extend(more);
            }
            let total = paths.len();
            let present = paths.iter().filter(|p| p.exists()).count();
            if present == 0 {
                if total > 0 {
                    log::debug!("ignoring removal-only batch of {total} path(s)");
                }
                continue;
            }
            log::debug!("{present} of {total} changed path(s) still present");
            self.trigger();
        }
        log::debug!("watch channel closed");
    }
}

/// Delete everything inside `dir`, keeping `dir` itself.
fn clear_dir(dir: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(std::io::Error::other)?;
        if entry.file_type().is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, SizeProfile};
    use crate::imaging::backend::tests::MockBackend;
    use crate::imaging::converter::tests::MockConverter;
    use crate::imaging::{BackendError, OutputFormat};
    use crate::test_helpers::{TestDirs, file_names, write_file};
    use std::sync::mpsc;

    fn run_config(dirs: &TestDirs, widths: &[u32]) -> RunConfig {
        let mut config = Config::default();
        config.directories = dirs.directories();
        config.profiles = vec![SizeProfile::new("test", widths.to_vec())];
        config.selection.active = vec!["test".into()];
        config.processing.max_processes = Some(2);
        RunConfig::resolve(&config, &["test".into()]).unwrap()
    }

    fn coordinator(dirs: &TestDirs) -> Coordinator {
        Coordinator::new(
            run_config(dirs, &[32, 16]),
            Box::new(MockBackend::new()),
            Box::new(MockConverter::new(64, 48)),
        )
        .unwrap()
    }

    /// Converter that blocks until released, to hold a run open.
    struct GatedConverter {
        entered: Mutex<Option<mpsc::Sender<()>>>,
        release: Mutex<mpsc::Receiver<()>>,
        inner: MockConverter,
    }

    impl FormatConverter for GatedConverter {
        fn convert(
            &self,
            input: &[u8],
            target: OutputFormat,
            quality: f32,
        ) -> Result<Vec<u8>, BackendError> {
            if let Some(tx) = self.entered.lock().unwrap().take() {
                tx.send(()).unwrap();
                self.release.lock().unwrap().recv().unwrap();
            }
            self.inner.convert(input, target, quality)
        }
    }

    // =========================================================================
    // Directory lifecycle
    // =========================================================================

    #[test]
    fn start_clears_directories_and_watches() {
        let dirs = TestDirs::new();
        write_file(&dirs.intake, "old.jpg", b"x");
        write_file(&dirs.working, "stale.jpg", b"x");
        write_file(&dirs.output, "old_320.jpg", b"x");
        fs::create_dir(dirs.output.join("nested")).unwrap();

        let coordinator = coordinator(&dirs);
        assert_eq!(coordinator.state(), CoordinatorState::Idle);
        coordinator.start().unwrap();

        assert_eq!(coordinator.state(), CoordinatorState::Watching);
        assert!(file_names(&dirs.intake).is_empty());
        assert!(file_names(&dirs.working).is_empty());
        assert!(file_names(&dirs.output).is_empty());
    }

    #[test]
    fn start_keeps_quarantine() {
        let dirs = TestDirs::new();
        fs::create_dir_all(&dirs.quarantine).unwrap();
        write_file(&dirs.quarantine, "bad.heic", b"x");

        coordinator(&dirs).start().unwrap();
        assert_eq!(file_names(&dirs.quarantine), vec!["bad.heic"]);
    }

    #[test]
    fn start_creates_missing_directories() {
        let dirs = TestDirs::new();
        fs::remove_dir_all(&dirs.working).unwrap();
        coordinator(&dirs).start().unwrap();
        assert!(dirs.working.is_dir());
    }

    // =========================================================================
    // Triggers
    // =========================================================================

    #[test]
    fn trigger_runs_full_pipeline() {
        let dirs = TestDirs::new();
        let coordinator = coordinator(&dirs);
        coordinator.start().unwrap();
        write_file(&dirs.intake, "photo.HEIC", b"heic");

        let outcome = coordinator.trigger();

        let TriggerOutcome::Completed(runs) = outcome else {
            panic!("expected a completed run, got {outcome:?}");
        };
        assert_eq!(runs.len(), 1);
        assert_eq!(file_names(&dirs.output), vec!["photo.HEIC_16.jpg", "photo.HEIC_32.jpg"]);
        assert!(file_names(&dirs.intake).is_empty());
        assert!(file_names(&dirs.working).is_empty());
        assert_eq!(coordinator.state(), CoordinatorState::Watching);
    }

    #[test]
    fn trigger_without_work_is_skipped() {
        let dirs = TestDirs::new();
        let coordinator = coordinator(&dirs);
        write_file(&dirs.intake, "readme.txt", b"x");
        assert!(matches!(coordinator.trigger(), TriggerOutcome::Skipped));
    }

    #[test]
    fn events_bracket_each_run() {
        let dirs = TestDirs::new();
        let (tx, rx) = mpsc::channel();
        let coordinator = coordinator(&dirs).with_events(tx);
        write_file(&dirs.intake, "a.jpg", b"x");

        coordinator.trigger();
        drop(coordinator);

        let events: Vec<RunEvent> = rx.iter().collect();
        assert_eq!(events.first(), Some(&RunEvent::RunStarted { run: 1 }));
        assert_eq!(
            events.last(),
            Some(&RunEvent::RunFinished {
                run: 1,
                published: 2,
                failed: 0
            })
        );
    }

    #[test]
    fn overlapping_trigger_is_queued_then_run() {
        let dirs = TestDirs::new();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let coordinator = Coordinator::new(
            run_config(&dirs, &[16]),
            Box::new(MockBackend::new()),
            Box::new(GatedConverter {
                entered: Mutex::new(Some(entered_tx)),
                release: Mutex::new(release_rx),
                inner: MockConverter::new(32, 32),
            }),
        )
        .unwrap();
        write_file(&dirs.intake, "first.heic", b"one");

        std::thread::scope(|s| {
            let running = s.spawn(|| coordinator.trigger());

            // First run is now blocked inside normalize
            entered_rx.recv().unwrap();
            assert_eq!(coordinator.state(), CoordinatorState::Normalizing);
            // Arrives after normalize listed its candidates
            write_file(&dirs.intake, "second.heic", b"two");
            assert!(matches!(coordinator.trigger(), TriggerOutcome::Queued));
            assert!(matches!(coordinator.trigger(), TriggerOutcome::Queued));

            release_tx.send(()).unwrap();
            let outcome = running.join().unwrap();

            let TriggerOutcome::Completed(runs) = outcome else {
                panic!("expected completed runs");
            };
            // Two queued triggers coalesce into one follow-up run
            assert_eq!(runs.len(), 2);
            assert_eq!(runs[0].converted, vec!["first.heic.jpg"]);
            assert_eq!(runs[0].published, vec!["first.heic_16.jpg"]);
            assert_eq!(runs[1].converted, vec!["second.heic.jpg"]);
        });

        assert_eq!(file_names(&dirs.output), vec!["first.heic_16.jpg", "second.heic_16.jpg"]);
        assert!(file_names(&dirs.intake).is_empty());
        assert!(file_names(&dirs.working).is_empty());
    }

    #[test]
    fn serve_triggers_per_batch_until_closed() {
        let dirs = TestDirs::new();
        let coordinator = coordinator(&dirs);
        let (tx, rx) = mpsc::channel();

        write_file(&dirs.intake, "a.png", b"x");
        tx.send(vec![dirs.intake.join("a.png")]).unwrap();
        tx.send(vec![]).unwrap();
        drop(tx);

        coordinator.serve(rx);
        assert_eq!(file_names(&dirs.output), vec!["a_16.jpg", "a_32.jpg"]);
    }

    #[test]
    fn removal_only_batch_does_not_spend_retries() {
        let dirs = TestDirs::new();
        let coordinator = Coordinator::new(
            run_config(&dirs, &[16]),
            Box::new(MockBackend::new().failing_decode("wide.jpg")),
            Box::new(MockConverter::new(64, 48)),
        )
        .unwrap();
        write_file(&dirs.intake, "wide.jpg", b"x");
        coordinator.trigger();
        let working = dirs.working.join("wide.jpg");
        assert_eq!(coordinator.ledger.attempts(&working), 1);

        // What the watcher reports after relocation moved the file out.
        let (tx, rx) = mpsc::channel();
        tx.send(vec![dirs.intake.join("wide.jpg")]).unwrap();
        drop(tx);
        coordinator.serve(rx);

        assert_eq!(coordinator.ledger.attempts(&working), 1);
        assert!(working.exists());
    }

    #[test]
    fn batch_with_a_present_path_still_triggers() {
        let dirs = TestDirs::new();
        let coordinator = coordinator(&dirs);
        write_file(&dirs.intake, "b.png", b"x");

        let (tx, rx) = mpsc::channel();
        tx.send(vec![dirs.intake.join("gone.png"), dirs.intake.join("b.png")])
            .unwrap();
        drop(tx);
        coordinator.serve(rx);

        assert_eq!(file_names(&dirs.output), vec!["b_16.jpg", "b_32.jpg"]);
    }

    #[test]
    fn stage_states_map_from_kinds() {
        assert_eq!(
            CoordinatorState::from(StageKind::Normalize),
            CoordinatorState::Normalizing
        );
        assert_eq!(
            CoordinatorState::from(StageKind::Relocate),
            CoordinatorState::Relocating
        );
        assert_eq!(
            CoordinatorState::from(StageKind::Process),
            CoordinatorState::Processing
        );
    }
}
