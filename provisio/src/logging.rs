//! Tracing subscriber setup.

use provisio_shared::errors::ProvisionResult;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_FILTER: &str = "info";
const LOG_FILE_PREFIX: &str = "provisio.log";

/// Install the global subscriber: stderr, plus daily-rolling files in
/// `log_dir` when given. Filtering follows `RUST_LOG` (default `info`).
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes and stops the file writer. Calling this again after a subscriber
/// is installed is a no-op that returns `None`.
pub fn init_logging(log_dir: Option<&Path>) -> ProvisionResult<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let console = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init();

    match installed {
        Ok(()) => {
            tracing::debug!(log_dir = ?log_dir, "Logging initialized");
            Ok(guard)
        }
        Err(e) => {
            tracing::debug!("Logging already initialized: {}", e);
            Ok(None)
        }
    }
}
