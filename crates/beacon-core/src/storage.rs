//! Persistent storage for paired devices.
//!
//! The core never persists anything itself; collaborators implement
//! [`ProfileStore`]. [`DeviceRegistry`] is the reference implementation, a single
//! JSON file holding every paired device with its profile and last `detect` value.
//!
//! Pairing commands and the scan loop may run as separate processes, so every
//! write re-reads the file, applies one change and writes it back.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::metadata::PairingMetadata;
use crate::reconcile::{DeviceProfile, ProfileDelta};
use crate::types::IdentityKey;

/// File name of the registry inside the data directory.
pub const REGISTRY_FILE_NAME: &str = "devices.json";

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The device is not in the registry.
    #[error("Device is not paired: {0}")]
    NotPaired(String),

    /// The device is already in the registry.
    #[error("Device is already paired: {0}")]
    AlreadyPaired(String),

    /// The registry file could not be read.
    #[error("Failed to read {}: {source}", .path.display())]
    ReadError {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The registry file could not be written.
    #[error("Failed to write {}: {source}", .path.display())]
    WriteError {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The registry file is not valid JSON.
    #[error("Failed to parse {}: {source}", .path.display())]
    ParseError {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// The registry could not be serialized.
    #[error("Failed to serialize registry: {0}")]
    SerializeError(#[from] serde_json::Error),

    /// The data directory could not be created.
    #[error("Failed to create directory {}: {source}", .path.display())]
    CreateDirError {
        /// Directory path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
}

/// Result alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A paired device as persisted by the collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairedDevice {
    /// Stable identity.
    pub identity: IdentityKey,

    /// Display name.
    pub name: String,

    /// Stored profile.
    pub profile: DeviceProfile,

    /// Last `detect` capability value.
    #[serde(default)]
    pub detected: Option<bool>,

    /// When the device was paired (UTC).
    pub paired_at: DateTime<Utc>,
}

/// Persistence operations the core relies on.
pub trait ProfileStore {
    /// Every paired device.
    fn known_devices(&self) -> Vec<PairedDevice>;

    /// Stored profile of one device.
    fn stored_profile(&self, identity: &IdentityKey) -> Option<DeviceProfile>;

    /// Fold a reconciliation delta into a stored profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is unknown or the store cannot be written.
    fn apply_profile_delta(&mut self, identity: &IdentityKey, delta: &ProfileDelta)
        -> crate::Result<()>;

    /// Persist the `detect` capability value.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is unknown or the store cannot be written.
    fn set_detected(&mut self, identity: &IdentityKey, detected: bool) -> crate::Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    devices: Vec<PairedDevice>,
}

/// JSON-file registry of paired devices.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    path: PathBuf,
    devices: Vec<PairedDevice>,
}

impl DeviceRegistry {
    /// Open the registry at `path`, starting empty if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        if !path.exists() {
            debug!(path = %path.display(), "No registry yet, starting empty");
            return Ok(Self {
                path,
                devices: Vec::new(),
            });
        }

        let content = std::fs::read_to_string(&path).map_err(|source| StorageError::ReadError {
            path: path.clone(),
            source,
        })?;
        let file: RegistryFile =
            serde_json::from_str(&content).map_err(|source| StorageError::ParseError {
                path: path.clone(),
                source,
            })?;

        debug!(path = %path.display(), devices = file.devices.len(), "Registry loaded");
        Ok(Self {
            path,
            devices: file.devices,
        })
    }

    /// Open the registry inside a data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open_in(data_dir: &Path) -> StorageResult<Self> {
        Self::open(data_dir.join(REGISTRY_FILE_NAME))
    }

    /// Registry file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Paired devices in pairing order.
    #[must_use]
    pub fn devices(&self) -> &[PairedDevice] {
        &self.devices
    }

    /// Look up a paired device.
    #[must_use]
    pub fn get(&self, identity: &IdentityKey) -> Option<&PairedDevice> {
        self.devices.iter().find(|device| &device.identity == identity)
    }

    fn get_mut(&mut self, identity: &IdentityKey) -> StorageResult<&mut PairedDevice> {
        self.devices
            .iter_mut()
            .find(|device| &device.identity == identity)
            .ok_or_else(|| StorageError::NotPaired(identity.to_string()))
    }

    /// Re-read the registry file, picking up changes made by other processes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed. The
    /// in-memory devices are left untouched in that case.
    pub fn reload(&mut self) -> StorageResult<()> {
        self.devices = Self::open(self.path.clone())?.devices;
        Ok(())
    }

    /// Reload, apply `change` to one device and save if it reports a change.
    fn modify(
        &mut self,
        identity: &IdentityKey,
        change: impl FnOnce(&mut PairedDevice) -> bool,
    ) -> StorageResult<()> {
        self.reload()?;
        if change(self.get_mut(identity)?) {
            self.save()?;
        }
        Ok(())
    }

    /// Identities of all paired devices.
    #[must_use]
    pub fn paired_identities(&self) -> HashSet<IdentityKey> {
        self.devices.iter().map(|device| device.identity.clone()).collect()
    }

    /// Pair a device from its discovery metadata and persist the registry.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::AlreadyPaired`] or a write error.
    pub fn pair(&mut self, metadata: &PairingMetadata) -> StorageResult<&PairedDevice> {
        self.reload()?;
        if self.get(&metadata.identity).is_some() {
            return Err(StorageError::AlreadyPaired(metadata.identity.to_string()));
        }

        self.devices.push(PairedDevice {
            identity: metadata.identity.clone(),
            name: metadata.name.clone(),
            profile: DeviceProfile::from_metadata(metadata),
            detected: None,
            paired_at: Utc::now(),
        });
        self.save()?;

        info!(device = %metadata.name, identity = %metadata.identity, "Device paired");
        let index = self.devices.len() - 1;
        Ok(&self.devices[index])
    }

    /// Remove a device and persist the registry.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotPaired`] or a write error.
    pub fn unpair(&mut self, identity: &IdentityKey) -> StorageResult<PairedDevice> {
        self.reload()?;
        let index = self
            .devices
            .iter()
            .position(|device| &device.identity == identity)
            .ok_or_else(|| StorageError::NotPaired(identity.to_string()))?;
        let device = self.devices.remove(index);
        self.save()?;

        info!(device = %device.name, %identity, "Device unpaired");
        Ok(device)
    }

    /// Write the registry to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn save(&self) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::CreateDirError {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let file = RegistryFile {
            devices: self.devices.clone(),
        };
        let content = serde_json::to_string_pretty(&file)?;
        std::fs::write(&self.path, content).map_err(|source| StorageError::WriteError {
            path: self.path.clone(),
            source,
        })
    }
}

impl ProfileStore for DeviceRegistry {
    fn known_devices(&self) -> Vec<PairedDevice> {
        self.devices.clone()
    }

    fn stored_profile(&self, identity: &IdentityKey) -> Option<DeviceProfile> {
        self.get(identity).map(|device| device.profile.clone())
    }

    fn apply_profile_delta(
        &mut self,
        identity: &IdentityKey,
        delta: &ProfileDelta,
    ) -> crate::Result<()> {
        if !delta.changed {
            return Ok(());
        }
        self.modify(identity, |device| {
            device.profile.apply(delta);
            true
        })?;
        Ok(())
    }

    fn set_detected(&mut self, identity: &IdentityKey, detected: bool) -> crate::Result<()> {
        self.modify(identity, |device| {
            let changed = device.detected != Some(detected);
            device.detected = Some(detected);
            changed
        })?;
        Ok(())
    }
}

/// Get the default data directory.
///
/// On Linux: `/var/lib/beacon/`
/// Elsewhere: the platform data directory.
#[must_use]
pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/lib/beacon")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "beacon")
            .map_or_else(|| PathBuf::from("./data"), |dirs| dirs.data_dir().to_path_buf())
    }
}

/// Get the default registry path.
#[must_use]
pub fn default_registry_path() -> PathBuf {
    default_data_dir().join(REGISTRY_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{setting, Settings};
    use crate::reconcile::reconcile;
    use crate::types::Capability;
    use crate::BeaconError;
    use tempfile::TempDir;

    fn metadata(n: u8) -> PairingMetadata {
        let address = format!("AA:BB:CC:DD:EE:{n:02X}");
        let mut settings = Settings::new();
        settings.insert(setting::ADDRESS.into(), address.clone());
        PairingMetadata {
            name: format!("Tag {n}"),
            identity: IdentityKey::Peripheral { address },
            settings,
            capabilities: vec![Capability::Detect, Capability::SignalStrength],
            energy: None,
            calibrated_power: None,
        }
    }

    #[test]
    fn test_open_missing_registry_is_empty() {
        let dir = TempDir::new().unwrap();
        let registry = DeviceRegistry::open_in(dir.path()).unwrap();
        assert!(registry.devices().is_empty());
        assert!(!registry.path().exists());
    }

    #[test]
    fn test_pair_persists_to_disk() {
        let dir = TempDir::new().unwrap();
        let mut registry = DeviceRegistry::open_in(dir.path()).unwrap();
        registry.pair(&metadata(1)).unwrap();
        registry.pair(&metadata(2)).unwrap();

        let reopened = DeviceRegistry::open_in(dir.path()).unwrap();
        assert_eq!(reopened.devices().len(), 2);
        let device = reopened.get(&metadata(1).identity).unwrap();
        assert_eq!(device.name, "Tag 1");
        assert_eq!(device.detected, None);
        assert_eq!(device.profile.capabilities.len(), 2);
    }

    #[test]
    fn test_pair_twice_fails() {
        let dir = TempDir::new().unwrap();
        let mut registry = DeviceRegistry::open_in(dir.path()).unwrap();
        registry.pair(&metadata(1)).unwrap();
        assert!(matches!(
            registry.pair(&metadata(1)),
            Err(StorageError::AlreadyPaired(_))
        ));
    }

    #[test]
    fn test_unpair() {
        let dir = TempDir::new().unwrap();
        let mut registry = DeviceRegistry::open_in(dir.path()).unwrap();
        registry.pair(&metadata(1)).unwrap();

        let removed = registry.unpair(&metadata(1).identity).unwrap();
        assert_eq!(removed.name, "Tag 1");
        assert!(matches!(
            registry.unpair(&metadata(1).identity),
            Err(StorageError::NotPaired(_))
        ));
        assert!(DeviceRegistry::open_in(dir.path()).unwrap().devices().is_empty());
    }

    #[test]
    fn test_set_detected_persists() {
        let dir = TempDir::new().unwrap();
        let mut registry = DeviceRegistry::open_in(dir.path()).unwrap();
        registry.pair(&metadata(1)).unwrap();
        registry.set_detected(&metadata(1).identity, true).unwrap();

        let reopened = DeviceRegistry::open_in(dir.path()).unwrap();
        assert_eq!(reopened.known_devices()[0].detected, Some(true));
    }

    #[test]
    fn test_writes_keep_changes_from_other_handles() {
        let dir = TempDir::new().unwrap();
        let mut daemon = DeviceRegistry::open_in(dir.path()).unwrap();
        daemon.pair(&metadata(1)).unwrap();
        daemon.pair(&metadata(3)).unwrap();

        let mut cli = DeviceRegistry::open_in(dir.path()).unwrap();
        cli.pair(&metadata(2)).unwrap();
        cli.unpair(&metadata(3).identity).unwrap();

        daemon.set_detected(&metadata(1).identity, true).unwrap();

        let reopened = DeviceRegistry::open_in(dir.path()).unwrap();
        let identities: Vec<_> = reopened.devices().iter().map(|d| d.identity.clone()).collect();
        assert_eq!(identities, vec![metadata(1).identity, metadata(2).identity]);
        assert_eq!(reopened.devices()[0].detected, Some(true));
        assert_eq!(daemon.devices().len(), 2);
    }

    #[test]
    fn test_set_detected_after_unpair_elsewhere() {
        let dir = TempDir::new().unwrap();
        let mut daemon = DeviceRegistry::open_in(dir.path()).unwrap();
        daemon.pair(&metadata(1)).unwrap();

        DeviceRegistry::open_in(dir.path())
            .unwrap()
            .unpair(&metadata(1).identity)
            .unwrap();

        let result = daemon.set_detected(&metadata(1).identity, true);
        assert!(matches!(result, Err(BeaconError::DeviceNotPaired(_))));
        assert!(DeviceRegistry::open_in(dir.path()).unwrap().devices().is_empty());
    }

    #[test]
    fn test_reload_keeps_devices_on_parse_error() {
        let dir = TempDir::new().unwrap();
        let mut registry = DeviceRegistry::open_in(dir.path()).unwrap();
        registry.pair(&metadata(1)).unwrap();

        std::fs::write(registry.path(), "{ not json").unwrap();
        assert!(registry.reload().is_err());
        assert_eq!(registry.devices().len(), 1);
    }

    #[test]
    fn test_set_detected_unknown_device() {
        let dir = TempDir::new().unwrap();
        let mut registry = DeviceRegistry::open_in(dir.path()).unwrap();
        let result = registry.set_detected(&metadata(9).identity, true);
        assert!(matches!(result, Err(BeaconError::DeviceNotPaired(_))));
    }

    #[test]
    fn test_apply_profile_delta() {
        let dir = TempDir::new().unwrap();
        let mut registry = DeviceRegistry::open_in(dir.path()).unwrap();
        registry.pair(&metadata(1)).unwrap();

        let mut fresh = metadata(1);
        fresh.capabilities.push(Capability::MeasureBattery);
        let stored = registry.stored_profile(&fresh.identity).unwrap();
        let delta = reconcile(&fresh, &stored);
        registry.apply_profile_delta(&fresh.identity, &delta).unwrap();

        let reopened = DeviceRegistry::open_in(dir.path()).unwrap();
        let profile = reopened.stored_profile(&fresh.identity).unwrap();
        assert!(profile.has_capability(&Capability::MeasureBattery));
    }

    #[test]
    fn test_corrupt_registry() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(REGISTRY_FILE_NAME), "{ not json").unwrap();
        assert!(matches!(
            DeviceRegistry::open_in(dir.path()),
            Err(StorageError::ParseError { .. })
        ));
    }

    #[test]
    fn test_default_paths() {
        assert!(default_registry_path().ends_with(REGISTRY_FILE_NAME));
    }
}
