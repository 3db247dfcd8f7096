// logging.rs — tracing subscriber writing vision_widescreen.log next to the DLL.

use crate::error::Result;
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const LOG_FILE_NAME: &str = "vision_widescreen.log";

/// Flushes the log writer when dropped; keep it alive until shutdown.
pub struct LogGuard {
    _writer: WorkerGuard,
}

/// Install the global subscriber. The file is recreated on every start.
///
/// `RUST_LOG` overrides the default `vision_widescreen=debug` filter.
pub fn init(dir: &Path) -> Result<LogGuard> {
    let file = fs::File::create(dir.join(LOG_FILE_NAME))?;
    let (writer, guard) = non_blocking(file);

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{}=debug", env!("CARGO_PKG_NAME"))));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(filter)
        .try_init()?;

    tracing::info!("logging to {}", dir.join(LOG_FILE_NAME).display());
    Ok(LogGuard { _writer: guard })
}
