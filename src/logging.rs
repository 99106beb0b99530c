//! Tracing bootstrap.
//!
//! Diagnostics always go to stderr. When a log directory is configured a
//! second, non-ANSI layer writes daily rolling files through
//! `tracing-appender`; the returned guard must live until shutdown so the
//! background writer flushes.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;
use crate::error::{BotError, Result};

const LOG_FILE_PREFIX: &str = "nudge.log";

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if the filter does not parse, the log directory cannot be
/// created, or a global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = resolve_filter(std::env::var("RUST_LOG").ok(), &config.filter)?;
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .try_init()
                .map_err(|e| BotError::Config(format!("tracing init failed: {e}")))?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .try_init()
                .map_err(|e| BotError::Config(format!("tracing init failed: {e}")))?;
            Ok(None)
        }
    }
}

/// `RUST_LOG` wins over the configured directive.
fn resolve_filter(env_directive: Option<String>, configured: &str) -> Result<EnvFilter> {
    let directive = env_directive
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| configured.to_owned());
    EnvFilter::try_new(&directive)
        .map_err(|e| BotError::Config(format!("invalid log filter {directive:?}: {e}")))
}
