//! Application configuration management.
//!
//! Handles loading, saving, and validating the scan settings:
//! - Scan cadence and timeout
//! - Presence verification thresholds
//! - Address type policy and distance curve
//! - Log level and log directory
//!
//! Configuration is layered with the `config` crate: a TOML file, then
//! `BEACON_*` environment variables (`BEACON_SCAN__UPDATE_INTERVAL=5`).
//! The camelCase names used by home-automation hosts are accepted as aliases.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decoder::DecoderConfig;
use crate::distance::DistanceModel;
use crate::presence::Thresholds;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "BEACON";

/// Upper bound for either verification amount.
pub const MAX_VERIFICATION_AMOUNT: u32 = 1000;

/// Lower bound for the scan timeout.
pub const MIN_SCAN_TIMEOUT_MS: u64 = 100;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file does not exist.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// Configuration file could not be written.
    #[error("Failed to write {path}: {source}")]
    WriteError {
        /// File path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Layered sources could not be parsed into a configuration.
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] ::config::ConfigError),

    /// Configuration could not be serialized.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A field holds an invalid value.
    #[error("Invalid value for '{field}': {message}")]
    ValidationError {
        /// Dotted field name.
        field: String,
        /// What is wrong.
        message: String,
    },

    /// More than one field is invalid.
    #[error("{} validation errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scan and presence settings.
    pub scan: ScanConfig,

    /// Registry storage settings.
    pub storage: StorageConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Scan and presence settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Seconds to wait between the end of one cycle and the next scan.
    #[serde(alias = "updateInterval", alias = "updateinterval")]
    pub update_interval: u64,

    /// Upper bound of a single scan, in milliseconds.
    #[serde(alias = "scanTimeoutMs", alias = "scantimeoutms")]
    pub scan_timeout_ms: u64,

    /// Consecutive sightings before a device is marked present. 0 behaves as 1.
    #[serde(alias = "verificationAmountInside", alias = "verificationamountinside")]
    pub verification_amount_inside: u32,

    /// Consecutive misses before a device is marked absent. 0 behaves as 1.
    #[serde(alias = "verificationAmountOutside", alias = "verificationamountoutside")]
    pub verification_amount_outside: u32,

    /// Accept devices advertising a random address.
    #[serde(alias = "ignoreAddressType", alias = "ignoreaddresstype")]
    pub ignore_address_type: bool,

    /// Distance curve.
    #[serde(alias = "distanceModel", alias = "distancemodel")]
    pub distance_model: DistanceModel,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            update_interval: 1,
            scan_timeout_ms: 10_000,
            verification_amount_inside: 1,
            verification_amount_outside: 3,
            ignore_address_type: false,
            distance_model: DistanceModel::default(),
        }
    }
}

impl ScanConfig {
    /// Presence thresholds.
    #[must_use]
    pub fn thresholds(&self) -> Thresholds {
        Thresholds::new(
            self.verification_amount_inside,
            self.verification_amount_outside,
        )
    }

    /// Decoder settings.
    #[must_use]
    pub const fn decoder_config(&self) -> DecoderConfig {
        DecoderConfig {
            ignore_address_type: self.ignore_address_type,
            distance_model: self.distance_model,
        }
    }

    /// Pause between cycles.
    #[must_use]
    pub const fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval)
    }

    /// Scan timeout.
    #[must_use]
    pub const fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }
}

/// Registry storage settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory. Platform default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

/// Logging settings. `RUST_LOG` and `BEACON_LOG_LEVEL` take precedence.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level for the beacon crates (`debug`), or a full filter directive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Directory for production log files. Platform default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `path` layered with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if the file does not exist, or a parse or
    /// validation error.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        Self::load_layered(path)
    }

    /// Load configuration, falling back to defaults when the file is missing.
    ///
    /// Environment overrides apply either way.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation error.
    pub fn load_or_default(path: &Path) -> ConfigResult<Self> {
        Self::load_layered(path)
    }

    fn load_layered(path: &Path) -> ConfigResult<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path).required(false))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;

        tracing::debug!(path = %path.display(), ?config, "Configuration loaded");
        Ok(config)
    }

    /// Save configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be serialized or written.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.display().to_string(),
            source,
        })
    }

    /// Check every field, collecting all problems.
    ///
    /// # Errors
    ///
    /// Returns the single error, or [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let scan = &self.scan;

        if scan.update_interval == 0 {
            errors.push(validation("scan.update_interval", "must be at least 1 second"));
        }
        if scan.scan_timeout_ms < MIN_SCAN_TIMEOUT_MS {
            errors.push(validation(
                "scan.scan_timeout_ms",
                &format!("must be at least {MIN_SCAN_TIMEOUT_MS} ms"),
            ));
        }
        if scan.verification_amount_inside > MAX_VERIFICATION_AMOUNT {
            errors.push(validation(
                "scan.verification_amount_inside",
                &format!("must be at most {MAX_VERIFICATION_AMOUNT}"),
            ));
        }
        if scan.verification_amount_outside > MAX_VERIFICATION_AMOUNT {
            errors.push(validation(
                "scan.verification_amount_outside",
                &format!("must be at most {MAX_VERIFICATION_AMOUNT}"),
            ));
        }
        if self
            .logging
            .level
            .as_deref()
            .is_some_and(|level| level.trim().is_empty())
        {
            errors.push(validation("logging.level", "must not be empty"));
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Data directory from config or the platform default.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .unwrap_or_else(crate::storage::default_data_dir)
    }
}

fn validation(field: &str, message: &str) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_string(),
        message: message.to_string(),
    }
}

/// Default configuration file path.
///
/// On Linux: `/etc/beacon/config.toml`
/// Elsewhere: the platform config directory.
#[must_use]
pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/etc/beacon/config.toml")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "beacon").map_or_else(
            || PathBuf::from("config.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }
}
