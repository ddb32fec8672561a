//! Logging initialization.
//!
//! Operator-facing output goes to stderr so it never interleaves with the
//! CLI's stdout reporting; a JSON copy of every event lands in a
//! daily-rotated file under the configured log directory.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Directive applied when `RUST_LOG` is unset.
const DEFAULT_DIRECTIVE: &str = "propflow=info";

/// Installs the global subscriber. The returned guard flushes buffered
/// file output on drop; the caller holds it for the life of the process.
pub fn init_logging(log_dir: impl AsRef<Path>) -> WorkerGuard {
    let log_dir = log_dir.as_ref();
    if let Err(e) = std::fs::create_dir_all(log_dir) {
        eprintln!("could not create log directory {}: {}", log_dir.display(), e);
    }

    let file_appender = tracing_appender::rolling::daily(log_dir, "propflow.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    // try_init so repeated calls (tests) keep the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_writer(file_writer))
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();

    guard
}
