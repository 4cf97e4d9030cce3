//! Tracing subscriber setup.
//!
//! Events always go to stderr (stdout carries protocol responses) and,
//! when `[logging] file` is set, are appended to that file as well.
//! `RUST_LOG` takes precedence over the configured level.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::{LogFormat, LoggingConfig};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to open log file '{path}': {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to install tracing subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber.
pub fn init(config: &LoggingConfig) -> Result<(), LoggingError> {
    let log_file = config.file.as_deref().map(open_log_file).transpose()?;
    build_subscriber(config, log_file).try_init()?;
    Ok(())
}

/// Filter from `RUST_LOG`, falling back to `level`.
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Subscriber shared by the binary and tests.
pub fn build_subscriber(
    config: &LoggingConfig,
    log_file: Option<File>,
) -> impl tracing::Subscriber + Send + Sync {
    let mut layers: Vec<BoxedLayer> = Vec::new();

    layers.push(match config.format {
        LogFormat::Pretty => fmt::layer().pretty().with_writer(std::io::stderr).boxed(),
        LogFormat::Compact => fmt::layer().compact().with_writer(std::io::stderr).boxed(),
    });
    if let Some(file) = log_file {
        layers.push(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(build_filter(&config.level))
}

fn open_log_file(path: &Path) -> Result<File, LoggingError> {
    File::options()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LoggingError::File {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::NamedTempFile;

    #[test]
    #[serial]
    fn test_events_reach_log_file() {
        std::env::remove_var("RUST_LOG");
        let log_file = NamedTempFile::new().unwrap();
        let config = LoggingConfig {
            level: "info".to_string(),
            ..LoggingConfig::default()
        };

        let subscriber = build_subscriber(&config, Some(log_file.reopen().unwrap()));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("opened /dev/ttyUSB0");
            tracing::debug!("filtered out");
        });

        let contents = std::fs::read_to_string(log_file.path()).unwrap();
        assert!(contents.contains("opened /dev/ttyUSB0"));
        assert!(!contents.contains("filtered out"));
    }

    #[test]
    fn test_unwritable_log_file_is_reported() {
        let err = open_log_file(Path::new("/nonexistent-dir/agent.log")).unwrap_err();
        assert!(matches!(err, LoggingError::File { .. }));
    }
}
