use std::path::Path;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;

use super::file_utils::ensure_dir_exists;

/// Log file written inside the configured log directory
pub const LOG_FILE_NAME: &str = "m3u8-dl.log";

const DEFAULT_FILTER: &str = "m3u8_batch_downloader=info,m3u8_dl=info";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Installs the global subscriber. `RUST_LOG` overrides the default filter.
///
/// With a log directory the output goes to `<log_dir>/m3u8-dl.log` through a
/// non-blocking writer; otherwise to stderr. Calling it twice is harmless.
pub fn init_tracing(log_dir: Option<&Path>) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_FILTER.into());

    let Some(log_dir) = log_dir else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
        return;
    };

    if let Err(err) = ensure_dir_exists(log_dir) {
        eprintln!("Failed to prepare log directory: {err:#}");
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
        return;
    }

    let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .try_init();
}
