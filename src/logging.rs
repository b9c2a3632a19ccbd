//! Logging for healer runs.
//!
//! [`init`] picks the output from the `[logging]` section: stderr only, or
//! stderr plus a daily-rotated JSON file under `dir`. `RUST_LOG` overrides
//! the configured level. Each subcommand runs inside [`command_span`], so
//! every JSON record carries the subcommand and the store it touched.

use std::path::Path;

use anyhow::Context;
use tracing::Span;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Prefix of the rotated log files, e.g. `autoheal.log.2024-05-01`.
pub const LOG_FILE_PREFIX: &str = "autoheal.log";

/// Keeps the file writer alive; dropping it flushes pending records.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// Install the global subscriber described by `config`.
///
/// Returns a guard when file logging is enabled. It must be held until the
/// process exits.
///
/// # Errors
///
/// Returns an error if the level is not a valid filter, the log directory
/// cannot be created, or a subscriber is already installed.
pub fn init(config: &LoggingConfig) -> anyhow::Result<Option<LoggingGuard>> {
    let filter = filter_for(&config.level)?;
    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let Some(dir) = &config.dir else {
        tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .try_init()
            .context("failed to install log subscriber")?;
        return Ok(None);
    };

    let (writer, guard) = file_writer(dir)?;
    let json = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_writer(writer);

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(json)
        .try_init()
        .context("failed to install log subscriber")?;

    Ok(Some(LoggingGuard { _guard: guard }))
}

/// `RUST_LOG` when set, otherwise `level`.
fn filter_for(level: &str) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level).with_context(|| format!("invalid logging.level '{level}'"))
}

fn file_writer(
    dir: &Path,
) -> anyhow::Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create logs directory {}", dir.display()))?;
    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    Ok(tracing_appender::non_blocking(appender))
}

/// Span wrapping one subcommand. `log` is the failure log for `run`.
pub fn command_span(command: &'static str, db: &Path, log: Option<&Path>) -> Span {
    tracing::info_span!(
        "autoheal",
        command,
        db = %db.display(),
        log = log.map(|p| tracing::field::display(p.display().to_string())),
    )
}
