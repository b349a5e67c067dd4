//! Daemon state: configuration snapshot and paired-device registry.

use std::path::{Path, PathBuf};

use anyhow::Context;
use beacon_core::{AdvertisementSource, Config, DeviceRegistry, ReplaySource};
use tracing::{info, warn};

/// State loaded at startup and refreshed between cycles.
#[derive(Debug)]
pub struct DaemonState {
    config_path: PathBuf,
    config: Config,
    registry: DeviceRegistry,
}

impl DaemonState {
    /// Open the registry named by an already loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry file is unreadable.
    pub fn open(config_path: &Path, config: Config) -> anyhow::Result<Self> {
        let data_dir = config.data_dir();
        let registry = DeviceRegistry::open_in(&data_dir)
            .with_context(|| format!("opening registry in {}", data_dir.display()))?;

        info!(
            config = %config_path.display(),
            registry = %registry.path().display(),
            devices = registry.devices().len(),
            "State loaded"
        );

        Ok(Self {
            config_path: config_path.to_path_buf(),
            config,
            registry,
        })
    }

    /// Build state from parts.
    #[must_use]
    pub const fn from_parts(config_path: PathBuf, config: Config, registry: DeviceRegistry) -> Self {
        Self {
            config_path,
            config,
            registry,
        }
    }

    /// Current configuration snapshot.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Paired-device registry.
    #[must_use]
    pub const fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Mutable access to the registry.
    pub fn registry_mut(&mut self) -> &mut DeviceRegistry {
        &mut self.registry
    }

    /// Re-read the configuration file, keeping the previous snapshot on error.
    pub fn reload_config(&mut self) -> &Config {
        match Config::load_or_default(&self.config_path) {
            Ok(config) => self.config = config,
            Err(e) => warn!(error = %e, "Keeping previous configuration"),
        }
        &self.config
    }

    /// Re-read the registry file, keeping the previous devices on error.
    pub fn reload_registry(&mut self) -> &DeviceRegistry {
        if let Err(e) = self.registry.reload() {
            warn!(error = %e, "Keeping previous registry");
        }
        &self.registry
    }
}

/// Load configuration from `config_path`, falling back to defaults.
///
/// # Errors
///
/// Returns an error if the file is invalid.
pub fn load_config(config_path: &Path) -> anyhow::Result<Config> {
    Config::load_or_default(config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))
}

/// Open the advertisement source: a replay capture if given, otherwise BlueZ.
///
/// # Errors
///
/// Returns an error if the capture cannot be loaded, or if no live source is
/// available in this build.
pub async fn open_source(replay: Option<&Path>) -> anyhow::Result<Box<dyn AdvertisementSource>> {
    if let Some(path) = replay {
        let source = ReplaySource::from_path(path)?;
        info!(path = %path.display(), cycles = source.len(), "Replaying capture");
        return Ok(Box::new(source));
    }
    open_live_source().await
}

#[cfg(feature = "bluetooth")]
async fn open_live_source() -> anyhow::Result<Box<dyn AdvertisementSource>> {
    let scanner = beacon_core::BluezScanner::new().await?;
    Ok(Box::new(scanner))
}

#[cfg(not(feature = "bluetooth"))]
#[allow(clippy::unused_async)]
async fn open_live_source() -> anyhow::Result<Box<dyn AdvertisementSource>> {
    anyhow::bail!("built without the `bluetooth` feature; pass --replay <capture.jsonl>")
}
