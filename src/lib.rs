//! # dropsize
//!
//! Watches a drop folder for new photos and publishes a fixed set of resized,
//! compressed variants of each one. Drop `IMG 0001.HEIC` into the intake
//! directory and a moment later `IMG_0001.HEIC_320.jpg` and
//! `IMG_0001.HEIC_1080.jpg` appear in the output directory.
//!
//! # Architecture: Three Barriered Stages
//!
//! Every filesystem trigger runs the same linear pipeline. Files inside a
//! stage are handled in parallel; a stage finishes completely before the
//! next one starts:
//!
//! ```text
//! 1. Normalize  intake/*.heic  →  working/*.heic.jpg (external converter)
//! 2. Relocate   intake/*.jpg   →  working/*.jpg      (copy, sync, delete)
//! 3. Process    working/*      →  output/*_W.ext     (fan-out → scale → compress → publish)
//! ```
//!
//! A file is owned by exactly one stage at a time. It leaves intake only
//! once its working copy is durably written, and it leaves working only once
//! every variant has been published.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | `config.toml` loading, merging over stock defaults, validation, [`config::RunConfig`] |
//! | [`matching`] | Extension patterns for intake and working files |
//! | [`naming`] | File name parsing, space sanitizing and variant names |
//! | [`selection`] | Static or interactive choice of size profiles |
//! | [`imaging`] | Decode/scale/compress backend and the external format converter |
//! | [`pipeline`] | Data model, the staged [`pipeline::Pipeline`], one module per stage, retry ledger |
//! | [`coordinator`] | Directory lifecycle, state machine and run serialization |
//! | [`watch`] | Debounced intake watcher feeding the coordinator |
//! | [`output`] | CLI output formatting of run events |
//! | [`logging`] | `env_logger` setup for the binary |
//!
//! # Design Decisions
//!
//! ## Failures Stay Local
//!
//! A file that fails to convert, decode, scale or compress is reported and
//! left where it is. Its siblings and the rest of the batch carry on, and
//! the next trigger retries it. The in-memory retry ledger moves a file to
//! the quarantine directory once it has failed `retry.max_attempts` times,
//! so one corrupt upload cannot be retried forever.
//!
//! ## Coalesced Triggers
//!
//! Runs never overlap. A trigger that arrives while a run is in progress
//! sets a pending flag, and the coordinator performs exactly one follow-up
//! run once the current one finishes. A burst of drops therefore costs at
//! most two runs.
//!
//! ## Backends Behind Traits
//!
//! Image codecs sit behind [`imaging::ImageBackend`] and the proprietary
//! format converter behind [`imaging::FormatConverter`]. Production uses the
//! pure-Rust `image` crate and an ImageMagick-compatible executable; tests
//! swap in recording mocks and never need either.

pub mod config;
pub mod coordinator;
pub mod imaging;
pub mod logging;
pub mod matching;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod selection;
pub mod watch;

#[cfg(test)]
pub(crate) mod test_helpers;
