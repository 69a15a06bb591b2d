//! CLI output formatting for pipeline runs.
//!
//! # Output Format
//!
//! ## Watch / Run
//!
//! ```text
//! ==> Run 1
//! Normalize
//!     IMG 0001.HEIC → IMG 0001.HEIC.jpg
//! Relocate
//!     beach.png
//! Process
//!     IMG 0001.HEIC.jpg → IMG_0001.HEIC_320.jpg (320px)
//!     IMG 0001.HEIC.jpg → IMG_0001.HEIC_1080.jpg (1080px)
//!     IMG 0001.HEIC.jpg: done
//!     FAILED beach.png: decoding beach.png failed: ...
//! Run 1: 2 published, 1 failed
//! ```
//!
//! ## Check
//!
//! ```text
//! Directories
//!     intake: input
//!     working: processing
//!     output: output
//! Profiles: web
//! Widths: 320, 1080
//! Inputs: *.{jpg,JPG,png,PNG}
//! Output: JPEG (quality 80)
//! ```
//!
//! # Architecture
//!
//! Each output has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::config::RunConfig;
use crate::pipeline::{RunContext, RunEvent, StageKind};

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn stage_title(stage: StageKind) -> &'static str {
    match stage {
        StageKind::Normalize => "Normalize",
        StageKind::Relocate => "Relocate",
        StageKind::Process => "Process",
    }
}

fn join_widths(widths: &[u32]) -> String {
    if widths.is_empty() {
        return "(none)".to_string();
    }
    widths
        .iter()
        .map(|w| w.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Format one progress event as display lines.
pub fn format_run_event(event: &RunEvent) -> Vec<String> {
    match event {
        RunEvent::RunStarted { run } => vec![format!("==> Run {run}")],
        RunEvent::StageStarted { stage } => vec![stage_title(*stage).to_string()],
        RunEvent::Converted { source, staged } => {
            vec![format!("{}{} → {}", indent(1), source, staged)]
        }
        RunEvent::Relocated { file } => vec![format!("{}{}", indent(1), file)],
        RunEvent::Published {
            source,
            file,
            width,
        } => vec![format!("{}{} → {} ({}px)", indent(1), source, file, width)],
        RunEvent::Purged { source } => vec![format!("{}{}: done", indent(1), source)],
        RunEvent::NoSizes { source } => vec![format!(
            "{}WARNING {}: no target widths, dropped",
            indent(1),
            source
        )],
        RunEvent::Failed { file, message, .. } => {
            vec![format!("{}FAILED {}: {}", indent(1), file, message)]
        }
        RunEvent::Quarantined { file, attempts } => vec![format!(
            "{}QUARANTINED {} after {} attempt(s)",
            indent(1),
            file,
            attempts
        )],
        RunEvent::RunFinished {
            run,
            published,
            failed,
        } => vec![format!("Run {run}: {published} published, {failed} failed")],
        RunEvent::TriggerQueued => {
            vec!["(changes queued until the current run finishes)".to_string()]
        }
    }
}

/// Summarize a finished run for `run` without `--json`.
pub fn format_run_summary(ctx: &RunContext) -> Vec<String> {
    let mut lines = vec![format!(
        "Converted {}, relocated {}, published {}, failed {}",
        ctx.converted.len(),
        ctx.relocated.len(),
        ctx.published.len(),
        ctx.failures.len()
    )];
    if !ctx.dropped.is_empty() {
        lines.push(format!("Dropped (no widths): {}", ctx.dropped.join(", ")));
    }
    if !ctx.quarantined.is_empty() {
        lines.push(format!("Quarantined: {}", ctx.quarantined.join(", ")));
    }
    for failure in &ctx.failures {
        lines.push(format!(
            "{}{} [{}]: {}",
            indent(1),
            failure.file,
            failure.stage,
            failure.message
        ));
    }
    lines
}

pub fn print_run_summary(ctx: &RunContext) {
    for line in format_run_summary(ctx) {
        println!("{}", line);
    }
}

/// Describe the resolved configuration for `check`.
pub fn format_check_output(config: &RunConfig) -> Vec<String> {
    let dirs = &config.directories;
    vec![
        "Directories".to_string(),
        format!("{}intake: {}", indent(1), dirs.intake.display()),
        format!("{}working: {}", indent(1), dirs.working.display()),
        format!("{}output: {}", indent(1), dirs.output.display()),
        format!("{}quarantine: {}", indent(1), dirs.quarantine.display()),
        format!("Profiles: {}", config.profiles.join(", ")),
        format!("Widths: {}", join_widths(&config.widths)),
        format!("Inputs: {}", config.input_pattern.glob()),
        format!(
            "Normalize: {} via {}",
            config.normalize.extensions.join(", "),
            config.normalize.program
        ),
        format!(
            "Output: {} (quality {})",
            config.output_format,
            config.quality.value()
        ),
    ]
}

pub fn print_check_output(config: &RunConfig) {
    for line in format_check_output(config) {
        println!("{}", line);
    }
}
