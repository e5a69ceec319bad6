//! Structured logging setup using `tracing-subscriber` and
//! `tracing-appender`.
//!
//! The `start` subcommand logs JSON to a daily-rotated file plus
//! human-readable stderr; one-shot subcommands log to stderr only. Both
//! respect `RUST_LOG` (default `info`).

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Holds the non-blocking writer guard for file logging.
///
/// Must be kept alive for the duration of the process; dropping it flushes
/// pending entries and closes the file.
pub struct LoggingGuard {
    _guard: Option<WorkerGuard>,
}

/// Initialise logging for the long-running service.
///
/// With a logs directory, writes JSON to `{logs_dir}/armitage.log.YYYY-MM-DD`
/// with daily rotation alongside stderr output. Without one, stderr only.
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created.
pub fn init_service(logs_dir: Option<&Path>) -> anyhow::Result<LoggingGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let Some(dir) = logs_dir else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(LoggingGuard { _guard: None });
    };

    std::fs::create_dir_all(dir)
        .map_err(|e| anyhow::anyhow!("failed to create logs directory {}: {e}", dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(dir, "armitage.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking);
    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(console_layer)
        .init();

    Ok(LoggingGuard {
        _guard: Some(guard),
    })
}

/// Initialise minimal stderr logging for one-shot subcommands.
pub fn init_cli() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}
