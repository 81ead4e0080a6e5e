//! Logging setup for the forwarder binary.
//!
//! Logs always go to stderr in the format chosen on the command line. With
//! `--log-file` they are also written to
//! `~/.local/state/adb-forward/forward.log` using a daily rolling appender.

use std::io::Write;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::cli::{Cli, LogFormat};

/// The directory under `~/.local/state/` where logs are stored.
const LOG_DIR_NAME: &str = "adb-forward";

/// The base filename for the rolling log file.
const LOG_FILE_NAME: &str = "forward.log";

/// A writer that wraps stderr and flushes after each write.
/// This ensures log lines are immediately visible when stderr is piped.
struct FlushingStderr;

impl Write for FlushingStderr {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let stderr = std::io::stderr();
        let mut handle = stderr.lock();
        let n = handle.write(buf)?;
        handle.flush()?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stderr().flush()
    }
}

/// Initialise the tracing subscriber.
///
/// Returns a [`WorkerGuard`] when file logging is enabled; it **must** be
/// held for the lifetime of the program, dropping it flushes and closes the
/// log file writer.
pub fn init_logging(cli: &Cli) -> Option<WorkerGuard> {
    // RUST_LOG wins over --log-level.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let use_color = cli.color.should_enable();

    let stderr_layer = match cli.log_format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(|| FlushingStderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_ansi(use_color)
            .with_target(false)
            .with_writer(|| FlushingStderr)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_ansi(use_color)
            .with_target(false)
            .with_writer(|| FlushingStderr)
            .boxed(),
    };

    let (file_layer, guard) = if cli.log_file {
        let log_dir = log_directory();
        if let Err(e) = std::fs::create_dir_all(&log_dir) {
            eprintln!(
                "warning: could not create log directory {}: {e}",
                log_dir.display()
            );
        }

        let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_NAME);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

/// Resolve the log directory path.
///
/// Uses the XDG state directory (`~/.local/state/adb-forward/`) where the
/// platform has one, falling back to `~/.local/state/adb-forward/` built by
/// hand, and finally the current directory.
fn log_directory() -> std::path::PathBuf {
    if let Some(state) = dirs::state_dir() {
        return state.join(LOG_DIR_NAME);
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".local").join("state").join(LOG_DIR_NAME);
    }
    std::path::PathBuf::from(".")
}
