//! Client configuration.
//!
//! Every component receives its configuration explicitly; nothing here is
//! global. A config file (JSON) provides the base values and a handful of
//! environment variables can override them.

use crate::backoff::BackoffConfig;
use crate::error::{ShipperError, ShipperResult};
use crate::reconciler::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default shipper socket.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/elastic-agent-shipper.sock";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Shipper client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShipperConfig {
    /// Path to the shipper's Unix socket.
    pub socket_path: PathBuf,
    /// Per-exchange timeout in seconds.
    pub request_timeout_secs: u64,
    /// Backoff applied between stalled publish attempts.
    pub publish_backoff: BackoffConfig,
    /// Backoff applied between checkpoint stream reconnects.
    pub reconnect_backoff: BackoffConfig,
    /// Retry budget for one batch.
    pub retry: RetryPolicy,
    /// Requested interval between persisted-index updates, in milliseconds.
    pub polling_interval_ms: u64,
    /// Give up on the checkpoint stream after this many consecutive failed
    /// reconnects. `None` keeps reconnecting until cancelled.
    pub max_reconnect_attempts: Option<u32>,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            request_timeout_secs: 30,
            publish_backoff: BackoffConfig::default(),
            reconnect_backoff: BackoffConfig {
                base_ms: 500,
                ceiling_ms: 30_000,
                jitter_factor: 0.2,
            },
            retry: RetryPolicy::default(),
            polling_interval_ms: 1_000,
            max_reconnect_attempts: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl ShipperConfig {
    /// Load from `path` when given and present, falling back to defaults,
    /// then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> ShipperResult<Self> {
        let mut config = match path {
            Some(path) if path.exists() => Self::load_from_file(path)?,
            _ => Self::default(),
        };
        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> ShipperResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ShipperError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| ShipperError::Config(format!("invalid config {}: {}", path.display(), e)))
    }

    fn load_from_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from a variable lookup.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(socket) = lookup("SHIPPER_SOCKET").filter(|s| !s.trim().is_empty()) {
            self.socket_path = PathBuf::from(socket);
        }
        if let Some(secs) = lookup("SHIPPER_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            self.request_timeout_secs = secs;
        }
        if let Some(retries) = lookup("SHIPPER_MAX_RETRIES").and_then(|s| s.parse().ok()) {
            self.retry.max_retries = Some(retries);
        }
        if let Some(level) = lookup("SHIPPER_LOG_LEVEL").filter(|s| !s.trim().is_empty()) {
            self.log_level = level;
        }
    }

    /// Reject values that would make the retry loops misbehave.
    pub fn validate(&self) -> ShipperResult<()> {
        if self.request_timeout_secs == 0 {
            return Err(ShipperError::Config(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        self.publish_backoff.validate("publish_backoff")?;
        self.reconnect_backoff.validate("reconnect_backoff")?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }
}
