//! Logging initialization.
//!
//! Structured JSONL goes to a log file when one is configured; a compact
//! human-readable layer can be added on stderr. `RUST_LOG` overrides the
//! configured level.

use crate::error::{ShipperError, ShipperResult};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, logged once at startup.
    pub service_name: String,
    /// Default level filter, overridden by `RUST_LOG`.
    pub default_level: String,
    /// JSONL log file. No file layer when unset.
    pub log_path: Option<PathBuf>,
    /// Also emit compact logs to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "shipper-client".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: true,
        }
    }
}

/// Open `path` for appending, creating missing parent directories.
///
/// Each event is written with a single `write` call on the unbuffered file,
/// so concurrent readers never see half a line.
pub fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global tracing subscriber.
///
/// Fails if the log file cannot be opened or a subscriber is already set.
pub fn init_logging(config: &LogConfig) -> ShipperResult<()> {
    let file_layer = match &config.log_path {
        Some(path) => {
            let file = open_log_file(path).map_err(|e| {
                ShipperError::Config(format!("failed to open log file {}: {}", path.display(), e))
            })?;
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(false)
                    .with_target(true)
                    .with_writer(Mutex::new(file))
                    .with_filter(env_filter(&config.default_level)),
            )
        }
        None => None,
    };

    let stderr_layer = if config.also_stderr {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_writer(io::stderr)
                .with_filter(env_filter(&config.default_level)),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| ShipperError::Config(format!("failed to install logger: {}", e)))?;

    tracing::info!(
        service = %config.service_name,
        log_path = ?config.log_path,
        "logging initialized"
    );
    Ok(())
}
