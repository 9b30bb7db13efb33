//! Tracing subscriber setup. A non-blocking writer over stdout, an
//! `EnvFilter` defaulting to `info`, and a choice between a human-readable
//! layer and a JSON layer selected by `--log-format`.

use crate::config::LogFormat;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Returns a guard that must be kept alive for the process lifetime (the
/// non-blocking writer flushes on drop); the binary leaks it via
/// `std::mem::forget` since the subscriber itself lives until process exit.
pub fn init(format: LogFormat) -> tracing_appender::non_blocking::WorkerGuard {
    let (non_blocking, guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(false)
                        .json(),
                )
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_target(false),
                )
                .init();
        }
    }

    guard
}
