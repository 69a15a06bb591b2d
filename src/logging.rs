//! Log setup for the `dropsize` binary.
//!
//! Progress lines go to stdout through [`crate::output`]; diagnostics go
//! through `log` to stderr. The default level is `info` (`debug` with
//! `--verbose`), and `RUST_LOG` overrides both.

use env_logger::{Builder, WriteStyle};
use log::LevelFilter;
use std::io::Write;

/// Level used when `RUST_LOG` is not set.
pub fn default_level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Install the global logger. Calling it twice is harmless.
pub fn init(verbose: bool) {
    let mut builder = Builder::new();
    builder
        .format(|buf, record| {
            let ts = buf.timestamp_seconds();
            writeln!(
                buf,
                "{} {:<5} {}: {}",
                ts,
                record.level(),
                record.target(),
                record.args()
            )
        })
        .write_style(WriteStyle::Auto)
        .filter(None, default_level(verbose))
        // Keep watcher internals quiet unless asked for explicitly.
        .filter(Some("notify"), LevelFilter::Warn)
        .filter(Some("notify_debouncer_mini"), LevelFilter::Warn)
        .parse_default_env();
    if builder.try_init().is_err() {
        log::debug!("logger already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_raises_level() {
        assert_eq!(default_level(false), LevelFilter::Info);
        assert_eq!(default_level(true), LevelFilter::Debug);
    }

    #[test]
    fn init_twice_does_not_panic() {
        init(false);
        init(true);
    }
}
