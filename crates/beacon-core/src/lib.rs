//! # beacon-core
//!
//! Core logic for BLE beacon presence detection.
//!
//! This crate provides:
//! - Classification of raw BLE advertisements into iBeacon, Eddystone and generic
//!   peripheral frames, with identity, signal, battery and distance metadata
//! - Debounced per-device presence with separate enter and leave thresholds
//! - Pairing metadata and reconciliation of stored device profiles
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`types`] - Raw advertisements, beacons, identity keys and capabilities
//! - [`decoder`] - Frame classification and field extraction
//! - [`distance`] - RSSI to distance curves
//! - [`metadata`] - Pairing metadata, vendor table and energy profiles
//! - [`presence`] - Hysteresis state machine, transition events and triggers
//! - [`reconcile`] - Stored profile diffing
//! - [`scan`] - Scan cycle orchestration, pairing and repair
//! - [`bluetooth`] - Advertisement sources and trigger sinks
//! - [`storage`] - Paired device persistence
//! - [`config`] - Configuration loading, saving, and validation
//! - [`error`] - Unified error types for the crate

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod bluetooth;
pub mod config;
pub mod decoder;
pub mod distance;
pub mod error;
pub mod metadata;
pub mod presence;
pub mod reconcile;
pub mod scan;
pub mod storage;
pub mod types;

// Re-export primary types for convenience
#[cfg(feature = "bluetooth")]
pub use bluetooth::BluezScanner;
#[cfg(any(test, feature = "mock-bluetooth"))]
pub use bluetooth::MemorySink;
pub use bluetooth::{AdvertisementSource, BluetoothError, BluetoothResult, EventSink, ReplaySource};
pub use config::{Config, ConfigError, ConfigResult, LoggingConfig, ScanConfig, StorageConfig};
pub use decoder::{DecoderConfig, FrameDecoder};
pub use distance::{DistanceEstimator, DistanceModel};
pub use error::{BeaconError, Error, Result};
pub use metadata::{
    extract_metadata, pairing_candidates, BatteryType, EnergyProfile, PairingMetadata, Settings,
};
pub use presence::{
    Presence, PresenceState, PresenceTracker, Thresholds, TransitionEvent, Trigger, TriggerScope,
};
pub use reconcile::{reconcile, DeviceProfile, ProfileDelta};
pub use scan::{CapabilityUpdate, CycleReport, Reading, ScanService};
pub use storage::{
    default_data_dir, default_registry_path, DeviceRegistry, PairedDevice, ProfileStore,
    StorageError,
};
pub use types::{
    is_valid_mac_address, AddressType, Beacon, BeaconKind, Capability, IdentityKey,
    RawAdvertisement, ServiceData,
};
