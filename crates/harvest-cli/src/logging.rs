//! Logging setup for the harvest binary.
//!
//! Events go to stdout and to `<directory>/<file>`, which is truncated at
//! the start of every run. The level defaults to `info` and follows
//! `RUST_LOG` when set.

use std::fs;
use std::io;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Keeps the non-blocking file writer alive. Dropping it flushes the log.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Prepare the log file, returning its path. Creates the directory and
/// clears any previous contents.
fn prepare_log_file(directory: &Path, file: &str) -> io::Result<std::path::PathBuf> {
    fs::create_dir_all(directory)?;
    let path = directory.join(file);
    fs::write(&path, "")?;
    Ok(path)
}

/// Install the global subscriber.
pub fn init_logging(directory: &Path, file: &str) -> io::Result<LoggingGuard> {
    prepare_log_file(directory, file)?;

    let file_appender = tracing_appender::rolling::never(directory, file);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_span_events(FmtSpan::CLOSE);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_target(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}
