//! Log output: human-readable lines on stdout plus a daily rolling file.

use std::path::Path;

use tracing_appender::{
    non_blocking::{NonBlocking, WorkerGuard},
    rolling::{InitError, RollingFileAppender, Rotation},
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Prefix of the log files; each day's file gets a `.YYYY-MM-DD` suffix.
pub const LOG_FILE_PREFIX: &str = "tiergate.log";

/// Non-blocking writer onto a file in `dir` that rolls over daily.
///
/// Buffered lines are flushed when the guard drops, so hold it until exit.
pub fn file_writer(dir: &Path) -> Result<(NonBlocking, WorkerGuard), InitError> {
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .build(dir)?;

    Ok(tracing_appender::non_blocking(appender))
}

/// Install the global subscriber. `RUST_LOG` overrides the default `info` level.
pub fn init(dir: &Path) -> Result<WorkerGuard, InitError> {
    let (file, guard) = file_writer(dir)?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(file))
        .init();

    Ok(guard)
}
