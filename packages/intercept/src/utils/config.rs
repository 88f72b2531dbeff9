// packages/intercept/src/utils/config.rs
//! Interceptor configuration
//!
//! Values come from an optional `sentra-intercept.{toml,yaml,json}` file in
//! the working directory, then from `SENTRA_INTERCEPT_` environment
//! variables (`__` separates nested keys, e.g.
//! `SENTRA_INTERCEPT_MIRROR__TIMEOUT_MS=500`).

use crate::utils::errors::Result;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const CONFIG_FILE_STEM: &str = "sentra-intercept";
const ENV_PREFIX: &str = "SENTRA_INTERCEPT";

/// Top-level interceptor configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InterceptorConfig {
    pub mirror: MirrorConfig,
    pub transport: TransportConfig,
    pub logging: LoggingConfig,
}

/// Mirror forwarding settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Upper bound on a single mirror submission (milliseconds)
    pub timeout_ms: u64,

    /// Content-Type sent with mirrored payloads
    pub content_type: String,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 3_000,
            content_type: "application/octet-stream".to_string(),
        }
    }
}

/// Settings for the TCP transport
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_timeout_ms: u64,

    /// Per-read timeout while receiving a response (milliseconds)
    pub read_timeout_ms: u64,

    /// Responses larger than this are truncated
    pub max_response_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            read_timeout_ms: 30_000,
            max_response_bytes: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,

    /// Log every intercepted request at debug level
    pub log_requests: bool,

    /// Maximum body size to log (bytes)
    pub max_log_body_size: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            log_requests: true,
            max_log_body_size: 10_000, // 10KB
        }
    }
}

impl InterceptorConfig {
    /// Load configuration from the default file (if present) and environment
    pub fn load() -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(CONFIG_FILE_STEM).required(false))
            .add_source(Self::environment())
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Load configuration from an explicit file, still honouring environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from(path.as_ref()).required(true))
            .add_source(Self::environment())
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }
}

impl MirrorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}
