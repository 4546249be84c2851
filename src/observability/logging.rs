//! Logging initialization for `capsule-arena`.
//!
//! Provides structured logging via `tracing` with human-readable and
//! JSON output formats, configurable verbosity, and environment-based
//! override via `ARENA_LOG_LEVEL`.

use std::io::IsTerminal;
use tracing_subscriber::EnvFilter;

use crate::cli::args::ColorChoice;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable format with optional ANSI colors.
    #[default]
    Human,
    /// Newline-delimited JSON for log shippers.
    Json,
}

/// Filter directive for a `-v` count.
///
/// Extra verbosity goes to the engine first; HTTP plumbing (`hyper`,
/// `reqwest`) stays one level quieter so per-round logs are not buried.
#[must_use]
pub const fn verbosity_to_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "warn,capsule_arena=info",
        2 => "info,capsule_arena=debug",
        _ => "debug,capsule_arena=trace",
    }
}

/// Installs the global subscriber on stderr.
///
/// `ARENA_LOG_LEVEL` overrides `verbosity` when set. JSON output flattens
/// event fields so `run_id` and `round` are top-level keys. A second call
/// is a no-op.
pub fn init_logging(format: LogFormat, verbosity: u8, color: ColorChoice) {
    let filter = EnvFilter::try_from_env("ARENA_LOG_LEVEL")
        .unwrap_or_else(|_| EnvFilter::new(verbosity_to_directive(verbosity)));
    let show_target = verbosity >= 2;

    let use_ansi = match color {
        ColorChoice::Auto => {
            std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
        }
        ColorChoice::Always => true,
        ColorChoice::Never => false,
    };

    match format {
        LogFormat::Human => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(use_ansi)
                .with_target(show_target)
                .with_writer(std::io::stderr)
                .try_init();
        }
        LogFormat::Json => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .flatten_event(true)
                .with_target(show_target)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
}
