//! TOML configuration for fastpulse.
//!
//! Every section has compiled-in defaults, so an empty file (or no file at all)
//! yields a working configuration. The file location can be given explicitly
//! (the binary maps both `--config` and `FASTPULSE_CONFIG` to that path) or
//! found at the standard system path.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::throughput::units::DEFAULT_OVERHEAD_FACTOR;
use crate::throughput::ThroughputError;

/// Standard system location of the config file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/fastpulse/fastpulse.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub units: UnitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve the configuration source.
    ///
    /// An explicit `path` must load or this fails. Otherwise
    /// `/etc/fastpulse/fastpulse.toml` is tried, then compiled-in defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::load_or_default()),
        }
    }

    /// Load the system config file, falling back to defaults when it is
    /// missing or unusable.
    pub fn load_or_default() -> Self {
        Self::load_or_default_from(Path::new(SYSTEM_CONFIG_PATH))
    }

    /// Load `path` if it exists. A file that exists but fails to load is
    /// reported at `warn` and replaced by defaults.
    pub fn load_or_default_from(path: &Path) -> Self {
        if path.exists() {
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    let error = format!("{e:#}");
                    warn!(
                        path = %path.display(),
                        error = %error,
                        "config file exists but could not be loaded, using defaults"
                    );
                    return Self::default();
                }
            }
        }

        debug!(path = %path.display(), "no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Reject values the sampler cannot work with.
    pub fn validate(&self) -> Result<(), ThroughputError> {
        let invalid = |reason: &str| {
            Err(ThroughputError::InvalidConfig {
                reason: reason.to_string(),
            })
        };

        if self.sampler.interval_ms == 0 {
            return invalid("sampler.interval_ms must be greater than zero");
        }
        if self.download.chunk_bytes == 0 {
            return invalid("download.chunk_bytes must be greater than zero");
        }
        if self.upload.read_bytes == 0 {
            return invalid("upload.read_bytes must be greater than zero");
        }
        if !(self.units.overhead_factor.is_finite() && self.units.overhead_factor > 0.0) {
            return invalid("units.overhead_factor must be a positive number");
        }
        Ok(())
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize configuration")
    }
}

// ---------------------------------------------------------------------------
// Sampler
// ---------------------------------------------------------------------------

/// Timing of the monitor loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Sampling interval in milliseconds.
    pub interval_ms: u64,
    /// Ramp-up time before the first sample, in milliseconds.
    pub warmup_ms: u64,
    /// Default session budget per direction, in seconds.
    pub max_time_secs: u64,
    /// How long to wait for workers to exit after the stop signal before
    /// aborting them, in milliseconds.
    pub shutdown_grace_ms: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 3_000,
            warmup_ms: 3_000,
            max_time_secs: 15,
            shutdown_grace_ms: 2_000,
        }
    }
}

impl SamplerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn max_time(&self) -> Duration {
        Duration::from_secs(self.max_time_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

// ---------------------------------------------------------------------------
// Transfers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Bytes read from the response body between counter updates.
    pub chunk_bytes: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            chunk_bytes: 100 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Size of each random upload payload.
    pub payload_bytes: usize,
    /// Bytes handed to the transport per body read.
    pub read_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            payload_bytes: 5 * 1024 * 1024,
            read_bytes: 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// TCP/TLS connect timeout in seconds.
    pub connect_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            user_agent: concat!("fastpulse/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Units
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitsConfig {
    /// Ratio of network-layer to application-layer bytes.
    pub overhead_factor: f64,
}

impl Default for UnitsConfig {
    fn default() -> Self {
        Self {
            overhead_factor: DEFAULT_OVERHEAD_FACTOR,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
