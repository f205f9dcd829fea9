//! Tracing subscriber setup: an `EnvFilter`, a text or JSON console layer
//! on stderr, and an optional daily rolling log file.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::LoggingSection;

/// File name prefix inside the log directory; the appender adds the date.
pub const LOG_FILE_PREFIX: &str = "tracker.log";

/// `RUST_LOG` wins over the configured filter.
pub fn build_filter(configured: &str, env: Option<&str>) -> Result<EnvFilter> {
    match env.filter(|e| !e.trim().is_empty()) {
        Some(directives) => EnvFilter::try_new(directives)
            .with_context(|| format!("Invalid RUST_LOG filter '{}'", directives)),
        None => EnvFilter::try_new(configured)
            .with_context(|| format!("Invalid log filter '{}'", configured)),
    }
}

/// Install the global subscriber. Keep the returned guard alive for the
/// lifetime of the process so the file writer flushes.
pub fn init(config: &LoggingSection) -> Result<Option<WorkerGuard>> {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(&config.filter, env.as_deref())?;

    let console = if config.json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_target(false).with_writer(std::io::stderr).boxed()
    };

    let (file, guard) = match &config.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(guard)
}
