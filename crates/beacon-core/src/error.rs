//! Unified error types for the beacon core library.
//!
//! This module provides a unified error type [`BeaconError`] that covers all failure
//! modes across the crate. Each module also has its own specific error type
//! ([`ConfigError`](crate::config::ConfigError),
//! [`StorageError`](crate::storage::StorageError),
//! [`BluetoothError`](crate::bluetooth::BluetoothError)) for internal use.
//!
//! Decoding never fails: an unclassifiable frame is a [`BeaconKind::Unknown`]
//! beacon, not an error.
//!
//! [`BeaconKind::Unknown`]: crate::types::BeaconKind::Unknown
//!
//! # Example
//!
//! ```rust
//! use beacon_core::error::{BeaconError, Result};
//! use std::path::PathBuf;
//!
//! fn load_config(path: &PathBuf) -> Result<()> {
//!     if !path.exists() {
//!         return Err(BeaconError::ConfigNotFound(path.clone()));
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// The unified error type for all beacon operations.
#[derive(Debug, Error)]
pub enum BeaconError {
    // =========================================================================
    // BLUETOOTH ERRORS
    // =========================================================================
    /// No Bluetooth adapter was found on this system.
    #[error(
        "No Bluetooth adapter found. Ensure Bluetooth hardware is present and drivers are loaded."
    )]
    BluetoothAdapterNotFound,

    /// The Bluetooth adapter exists but is powered off.
    #[error("Bluetooth adapter is powered off. Run 'bluetoothctl power on' to enable.")]
    BluetoothAdapterPoweredOff,

    /// Scanning failed or timed out.
    #[error("Bluetooth scan failed: {0}")]
    BluetoothScanFailed(String),

    // =========================================================================
    // DEVICE ERRORS
    // =========================================================================
    /// No pairable device was seen during discovery.
    #[error("No devices found. Ensure the beacon is powered on and within range.")]
    NoDevicesFound,

    /// The device was not seen in the current scan cycle.
    #[error("Device not found: '{0}'. Ensure the device is powered on and within range.")]
    DeviceNotFound(String),

    /// The device is not in the registry.
    #[error("Device is not paired: '{0}'")]
    DeviceNotPaired(String),

    /// The device is already in the registry.
    #[error("Device is already paired: '{0}'")]
    DeviceAlreadyPaired(String),

    /// A trigger could not be delivered.
    #[error("Failed to deliver trigger '{name}': {message}")]
    TriggerFailed {
        /// Trigger identifier.
        name: String,
        /// What went wrong.
        message: String,
    },

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// An error occurred while persisting or reading data.
    #[error("Persistence error: {0}")]
    PersistenceError(String),
}

/// A specialized [`Result`] type for beacon operations.
pub type Result<T> = std::result::Result<T, BeaconError>;

/// Short alias for [`BeaconError`].
pub type Error = BeaconError;

impl BeaconError {
    /// Returns `true` if this error is related to Bluetooth operations.
    #[inline]
    #[must_use]
    pub const fn is_bluetooth_error(&self) -> bool {
        matches!(
            self,
            Self::BluetoothAdapterNotFound
                | Self::BluetoothAdapterPoweredOff
                | Self::BluetoothScanFailed(_)
        )
    }

    /// Returns `true` if this error concerns a device rather than the system.
    #[inline]
    #[must_use]
    pub const fn is_device_error(&self) -> bool {
        matches!(
            self,
            Self::NoDevicesFound
                | Self::DeviceNotFound(_)
                | Self::DeviceNotPaired(_)
                | Self::DeviceAlreadyPaired(_)
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub const fn is_io_error(&self) -> bool {
        matches!(self, Self::PersistenceError(_))
    }

    /// Returns `true` if this error is likely to clear up on the next cycle.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NoDevicesFound
                | Self::DeviceNotFound(_)
                | Self::BluetoothScanFailed(_)
                | Self::TriggerFailed { .. }
        )
    }

    /// Returns a machine-readable error code.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::BluetoothAdapterNotFound => "BLUETOOTH_ADAPTER_NOT_FOUND",
            Self::BluetoothAdapterPoweredOff => "BLUETOOTH_ADAPTER_POWERED_OFF",
            Self::BluetoothScanFailed(_) => "BLUETOOTH_SCAN_FAILED",
            Self::NoDevicesFound => "NO_DEVICES_FOUND",
            Self::DeviceNotFound(_) => "DEVICE_NOT_FOUND",
            Self::DeviceNotPaired(_) => "DEVICE_NOT_PAIRED",
            Self::DeviceAlreadyPaired(_) => "DEVICE_ALREADY_PAIRED",
            Self::TriggerFailed { .. } => "TRIGGER_FAILED",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for BeaconError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path.into()),
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {path}: {source}"))
            }
            ConfigError::ParseError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::storage::StorageError> for BeaconError {
    fn from(err: crate::storage::StorageError) -> Self {
        use crate::storage::StorageError;
        match err {
            StorageError::NotPaired(identity) => Self::DeviceNotPaired(identity),
            StorageError::AlreadyPaired(identity) => Self::DeviceAlreadyPaired(identity),
            StorageError::ReadError { path, source } => {
                Self::PersistenceError(format!("Failed to read {}: {source}", path.display()))
            }
            StorageError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {}: {source}", path.display()))
            }
            StorageError::ParseError { path, source } => {
                Self::PersistenceError(format!("Failed to parse {}: {source}", path.display()))
            }
            StorageError::SerializeError(e) => Self::PersistenceError(e.to_string()),
            StorageError::CreateDirError { path, source } => Self::PersistenceError(format!(
                "Failed to create directory {}: {source}",
                path.display()
            )),
        }
    }
}

impl From<crate::bluetooth::BluetoothError> for BeaconError {
    fn from(err: crate::bluetooth::BluetoothError) -> Self {
        use crate::bluetooth::BluetoothError;
        match err {
            BluetoothError::AdapterNotFound => Self::BluetoothAdapterNotFound,
            BluetoothError::AdapterPoweredOff => Self::BluetoothAdapterPoweredOff,
            BluetoothError::ScanTimeout { duration_ms } => {
                Self::BluetoothScanFailed(format!("Scan timed out after {duration_ms} ms"))
            }
            BluetoothError::SessionInitFailed { message }
            | BluetoothError::DiscoveryFailed { message } => Self::BluetoothScanFailed(message),
            BluetoothError::ReplayFailed { path, message } => {
                Self::PersistenceError(format!("Failed to replay {}: {message}", path.display()))
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
