//! Sets up the `tracing` subscriber for the command line tools.

use std::{fs::OpenOptions, io, path::Path, sync::Arc};

use tracing_subscriber::{EnvFilter, Layer, filter, layer::SubscriberExt, util::SubscriberInitExt};

/// The stderr log level when `RUST_LOG` is not set.
const DEFAULT_STDERR_FILTER: &str = "info";

/// Log to stderr and, if `log_path` is given, append debug logs to that file.
///
/// The stderr level defaults to `info` and can be changed with the `RUST_LOG`
/// environment variable.
///
/// # Errors
/// Returns an error if the log file could not be opened.
pub fn setup_logging(log_path: Option<&Path>) -> io::Result<()> {
    let stderr_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_STDERR_FILTER));
    let stderr_log = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_filter(stderr_filter);

    let debug_log = match log_path {
        Some(log_path) => {
            let log_file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)?;

            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(log_file))
                    .with_filter(filter::LevelFilter::DEBUG),
            )
        }
        None => None,
    };

    // A second call, e.g. from tests, keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(stderr_log)
        .with(debug_log)
        .try_init();

    Ok(())
}
