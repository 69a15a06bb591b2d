//! Dead-letter handling for files that keep failing.
//!
//! The [`RetryLedger`] counts failed runs per file for the lifetime of the
//! process. Once a file reaches `retry.max_attempts` it is moved out of the
//! pipeline into the quarantine directory, so it stops being retried on
//! every trigger. With `max_attempts = 0` files are retried forever.
//! A file quarantined under a name already taken gets a numbered name
//! (`broken-2.heic`), so earlier casualties are kept.

use super::relocate::move_file;
use super::{RunContext, RunEvent, StageEnv, file_name_of};
use crate::naming::numbered_file_name;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// What to do with a file after recording a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Leave it in place; the next run tries again.
    Retry { attempts: u32 },
    /// Move it to the quarantine directory.
    Quarantine { attempts: u32 },
}

/// Failure counts per file path.
#[derive(Debug, Default)]
pub struct RetryLedger {
    max_attempts: u32,
    counts: Mutex<HashMap<PathBuf, u32>>,
}

impl RetryLedger {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Count one more failure for `path` and decide its fate.
    pub fn record_failure(&self, path: &Path) -> Verdict {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        let attempts = counts.entry(path.to_path_buf()).or_insert(0);
        *attempts += 1;
        if self.max_attempts > 0 && *attempts >= self.max_attempts {
            Verdict::Quarantine {
                attempts: *attempts,
            }
        } else {
            Verdict::Retry {
                attempts: *attempts,
            }
        }
    }

    /// Forget failures for `path`, after it succeeds or leaves the pipeline.
    pub fn clear(&self, path: &Path) {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
    }

    pub fn attempts(&self, path: &Path) -> u32 {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .copied()
            .unwrap_or(0)
    }
}

/// Record a failure for `path` and quarantine it if it has run out of attempts.
pub fn handle_failure(env: &StageEnv<'_>, ctx: &mut RunContext, path: &Path) {
    match env.ledger.record_failure(path) {
        Verdict::Retry { attempts } => {
            log::debug!(
                "{} failed {} time(s), will retry",
                path.display(),
                attempts
            );
        }
        Verdict::Quarantine { attempts } => {
            let dir = &env.config.directories.quarantine;
            let moved = fs::create_dir_all(dir)
                .map_err(Into::into)
                .and_then(|()| move_file(path, &free_destination(dir, path)));
            match moved {
                Ok(_) => {
                    log::warn!(
                        "quarantined {} after {} failed attempt(s)",
                        path.display(),
                        attempts
                    );
                    env.ledger.clear(path);
                    let file = file_name_of(path);
                    env.emit(RunEvent::Quarantined {
                        file: file.clone(),
                        attempts,
                    });
                    ctx.quarantined.push(file);
                }
                Err(e) => log::error!("could not quarantine {}: {}", path.display(), e),
            }
        }
    }
}

/// First name in `dir` not yet taken: the file's own, then `-2`, `-3`, ...
fn free_destination(dir: &Path, path: &Path) -> PathBuf {
    let name = file_name_of(path);
    let mut dest = dir.join(&name);
    let mut n = 2;
    while dest.exists() {
        dest = dir.join(numbered_file_name(&name, n));
        n += 1;
    }
    dest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::Harness;
    use crate::test_helpers::write_file;

    #[test]
    fn ledger_counts_until_limit() {
        let ledger = RetryLedger::new(3);
        let path = Path::new("/in/a.heic");
        assert_eq!(ledger.record_failure(path), Verdict::Retry { attempts: 1 });
        assert_eq!(ledger.record_failure(path), Verdict::Retry { attempts: 2 });
        assert_eq!(
            ledger.record_failure(path),
            Verdict::Quarantine { attempts: 3 }
        );
    }

    #[test]
    fn ledger_zero_means_unbounded() {
        let ledger = RetryLedger::new(0);
        let path = Path::new("/in/a.heic");
        for i in 1..=50 {
            assert_eq!(ledger.record_failure(path), Verdict::Retry { attempts: i });
        }
    }

    #[test]
    fn ledger_counts_are_per_path() {
        let ledger = RetryLedger::new(2);
        ledger.record_failure(Path::new("/a"));
        assert_eq!(ledger.attempts(Path::new("/a")), 1);
        assert_eq!(ledger.attempts(Path::new("/b")), 0);
        ledger.clear(Path::new("/a"));
        assert_eq!(ledger.attempts(Path::new("/a")), 0);
    }

    #[test]
    fn handle_failure_moves_file_at_limit() {
        let h = Harness::new(&[320]);
        let path = write_file(&h.dirs.intake, "broken.heic", b"CORRUPT");
        let (tx, rx) = std::sync::mpsc::channel();
        let env = h.env(Some(&tx));
        let mut ctx = RunContext::new();

        for _ in 0..h.ledger.max_attempts() {
            handle_failure(&env, &mut ctx, &path);
        }
        drop(tx);

        assert_eq!(ctx.quarantined, vec!["broken.heic"]);
        assert!(!path.exists());
        assert!(h.dirs.quarantine.join("broken.heic").exists());
        assert_eq!(h.ledger.attempts(&path), 0);
        assert!(rx.iter().any(|e| matches!(e, RunEvent::Quarantined { .. })));
    }

    #[test]
    fn repeated_conversion_failures_end_in_quarantine() {
        let h = Harness::new(&[320]);
        write_file(&h.dirs.intake, "broken.heic", b"CORRUPT");
        let env = h.env(None);

        let mut last = RunContext::new();
        for _ in 0..h.ledger.max_attempts() {
            last = crate::pipeline::normalize::normalize_stage(&env, RunContext::new());
        }

        assert_eq!(last.quarantined, vec!["broken.heic"]);
        assert!(!h.dirs.intake.join("broken.heic").exists());
        assert!(h.dirs.quarantine.join("broken.heic").exists());
    }

    #[test]
    fn same_name_quarantines_alongside_earlier_file() {
        let h = Harness::new(&[320]);
        fs::create_dir_all(&h.dirs.quarantine).unwrap();
        write_file(&h.dirs.quarantine, "broken.heic", b"first casualty");
        let path = write_file(&h.dirs.intake, "broken.heic", b"CORRUPT");
        let env = h.env(None);
        let mut ctx = RunContext::new();

        for _ in 0..h.ledger.max_attempts() {
            handle_failure(&env, &mut ctx, &path);
        }

        assert_eq!(ctx.quarantined, vec!["broken.heic"]);
        assert_eq!(
            fs::read(h.dirs.quarantine.join("broken.heic")).unwrap(),
            b"first casualty"
        );
        assert_eq!(
            fs::read(h.dirs.quarantine.join("broken-2.heic")).unwrap(),
            b"CORRUPT"
        );
        assert!(!path.exists());
    }
}
