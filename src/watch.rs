//! Debounced watching of the intake directory.
//!
//! Raw filesystem events arrive in bursts: one dropped photo produces
//! create, modify and close events, and a drop of fifty photos produces
//! hundreds. `notify-debouncer-mini` folds everything inside the debounce
//! window into one batch of changed paths, and each batch is sent down a
//! channel for [`Coordinator::serve`](crate::coordinator::Coordinator::serve).

use notify::RecursiveMode;
use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::time::Duration;

/// Keeps the watch alive; dropping it stops event delivery and closes the
/// batch channel once the debouncer thread exits.
pub struct IntakeWatcher {
    _debouncer: Debouncer<notify::RecommendedWatcher>,
    dir: PathBuf,
}

impl IntakeWatcher {
    /// Watch `dir` (non-recursively) and send one `Vec<PathBuf>` per batch.
    pub fn new(dir: &Path, debounce: Duration, batches: Sender<Vec<PathBuf>>) -> notify::Result<Self> {
        let mut debouncer = new_debouncer(debounce, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let paths: Vec<PathBuf> = events.into_iter().map(|e| e.path).collect();
                    log::debug!("{} debounced event(s)", paths.len());
                    if batches.send(paths).is_err() {
                        log::debug!("batch receiver gone, dropping events");
                    }
                }
                Err(e) => log::error!("watch error: {e:?}"),
            }
        })?;
        debouncer
            .watcher()
            .watch(dir, RecursiveMode::NonRecursive)?;
        log::info!("watching {}", dir.display());
        Ok(Self {
            _debouncer: debouncer,
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
