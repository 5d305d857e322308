//! Structured logging for the updater.
//!
//! Two sinks exist side by side:
//! - `tracing` events on stderr (human or JSONL) for operators and agents
//! - a per-session [`RunLog`] file under the tool directory that survives
//!   the process and is mirrored into the session record
//!
//! stdout is reserved for command payloads (reports, JSON).

pub mod config;
pub mod run_log;

pub use config::{LogConfig, LogFormat, LogLevel};
pub use run_log::{RunLevel, RunLog};

use std::io::IsTerminal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the logging subsystem.
///
/// Returns `false` when a global subscriber was already installed (tests,
/// embedding hosts); the existing subscriber is left untouched.
pub fn init_logging(config: &LogConfig) -> bool {
    // Event targets are `update.*`, `config.*`, `archive.*`, so the
    // default directive applies globally rather than per crate.
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) if std::env::var(config::LOG_LEVEL_ENV).is_err() => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.level.to_string())),
        _ => EnvFilter::new(config.level.to_string()),
    };

    match config.format {
        LogFormat::Human => {
            let use_ansi = std::io::stderr().is_terminal();
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_ansi(use_ansi);

            if config.timestamps {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer)
                    .try_init()
                    .is_ok()
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer.without_time())
                    .try_init()
                    .is_ok()
            }
        }
        LogFormat::Jsonl => {
            let json_layer = fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_current_span(false)
                .flatten_event(true);
            tracing_subscriber::registry()
                .with(filter)
                .with(json_layer)
                .try_init()
                .is_ok()
        }
    }
}

/// Truncate a long string for log output.
pub fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &s[..end])
}
