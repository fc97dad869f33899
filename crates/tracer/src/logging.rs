//! Logging system setup.
//!
//! `RUST_LOG` wins over the configured level when set. Output goes to stdout,
//! or to an append-mode file when `logging.file_path` is configured.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

use crate::config::LoggingSettings;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

fn build_layer(config: &LoggingSettings) -> Result<BoxedLayer> {
    let Some(path) = config.file_path.as_deref().filter(|p| !p.trim().is_empty()) else {
        let layer = if config.json_format {
            fmt::layer()
                .json()
                .with_target(false)
                .with_thread_ids(true)
                .boxed()
        } else {
            fmt::layer().with_target(false).boxed()
        };
        return Ok(layer);
    };

    let path = Path::new(path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("creating log directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {}", path.display()))?;
    let writer = Mutex::new(file);

    let layer = if config.json_format {
        fmt::layer()
            .json()
            .with_target(false)
            .with_thread_ids(true)
            .with_writer(writer)
            .boxed()
    } else {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(writer)
            .boxed()
    };
    Ok(layer)
}

/// Initialize the global tracing subscriber.
///
/// # Arguments
///
/// * `config` - Level, output format and optional log file
///
/// # Returns
///
/// `Ok(())` once the subscriber is installed. Fails if the log file cannot
/// be opened or a global subscriber is already set.
///
/// # Examples
///
/// ```rust,no_run
/// use tracer::config::LoggingSettings;
/// use tracer::logging::setup_logging;
///
/// let settings = LoggingSettings {
///     level: "debug".to_string(),
///     json_format: true,
///     file_path: Some("logs/tracer.log".to_string()),
/// };
/// setup_logging(&settings).expect("logging");
/// ```
pub fn setup_logging(config: &LoggingSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let layer = build_layer(config)?;

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .context("installing tracing subscriber")?;

    info!("Logging initialized with level: {}", config.level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_layer_creates_log_file() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("logs").join("tracer.log");
        let config = LoggingSettings {
            level: "info".to_string(),
            json_format: true,
            file_path: Some(path.to_string_lossy().to_string()),
        };
        build_layer(&config).expect("layer");
        assert!(path.exists());
    }

    #[test]
    fn test_blank_file_path_means_stdout() {
        let config = LoggingSettings {
            file_path: Some("  ".to_string()),
            ..LoggingSettings::default()
        };
        build_layer(&config).expect("layer");
    }
}
