//! Advertisement sources and trigger sinks.
//!
//! This module provides:
//! - [`AdvertisementSource`]: one bounded scan returning the raw advertisement set
//! - [`EventSink`]: delivery of automation triggers to the host
//! - [`ReplaySource`]: scan cycles replayed from a JSON-lines capture
//! - `BluezScanner`: live scanning through BlueZ (feature `bluetooth`)
//! - `MemorySink`: a recording sink (tests and feature `mock-bluetooth`)

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::presence::Trigger;
use crate::types::RawAdvertisement;

/// Bluetooth and advertisement source errors.
#[derive(Debug, Error)]
pub enum BluetoothError {
    /// No adapter is present.
    #[error("No Bluetooth adapter found")]
    AdapterNotFound,

    /// The adapter is present but could not be powered on.
    #[error("Bluetooth adapter is powered off")]
    AdapterPoweredOff,

    /// The scan did not complete in time.
    #[error("Scan timed out after {duration_ms} ms")]
    ScanTimeout {
        /// Timeout that elapsed.
        duration_ms: u64,
    },

    /// The BlueZ session could not be opened.
    #[error("Failed to initialize Bluetooth session: {message}")]
    SessionInitFailed {
        /// Underlying error.
        message: String,
    },

    /// Discovery failed mid-scan.
    #[error("Discovery failed: {message}")]
    DiscoveryFailed {
        /// Underlying error.
        message: String,
    },

    /// A replay capture could not be loaded.
    #[error("Failed to load replay {}: {message}", .path.display())]
    ReplayFailed {
        /// Capture path.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },
}

/// Result alias for advertisement sources.
pub type BluetoothResult<T> = std::result::Result<T, BluetoothError>;

/// Produces the advertisements heard during one scan.
#[async_trait]
pub trait AdvertisementSource: Send + Sync {
    /// Listen for `duration` and return every advertisement heard.
    async fn scan(&self, duration: Duration) -> BluetoothResult<Vec<RawAdvertisement>>;
}

/// Receives triggers for the host to fire.
pub trait EventSink: Send + Sync {
    /// Deliver one trigger.
    ///
    /// # Errors
    ///
    /// Returns an error if the trigger could not be delivered.
    fn emit(&self, trigger: &Trigger) -> crate::Result<()>;
}

// ============================================================================
// Replay
// ============================================================================

/// Replays captured scan cycles, one JSON array of advertisements per line.
///
/// Cycles repeat once the capture is exhausted.
#[derive(Debug, Default)]
pub struct ReplaySource {
    cycles: Vec<Vec<RawAdvertisement>>,
    cursor: AtomicUsize,
}

impl ReplaySource {
    /// Replay the given cycles.
    #[must_use]
    pub const fn new(cycles: Vec<Vec<RawAdvertisement>>) -> Self {
        Self {
            cycles,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Load a JSON-lines capture. Blank lines are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`BluetoothError::ReplayFailed`] if the file cannot be read or a
    /// line is not a JSON array of advertisements.
    pub fn from_path(path: &Path) -> BluetoothResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| BluetoothError::ReplayFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&content).map_err(|message| BluetoothError::ReplayFailed {
            path: path.to_path_buf(),
            message,
        })
    }

    fn parse(content: &str) -> std::result::Result<Self, String> {
        let cycles = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                serde_json::from_str(line).map_err(|e| format!("line {}: {e}", index + 1))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self::new(cycles))
    }

    /// Number of distinct cycles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cycles.len()
    }

    /// Whether the capture is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }
}

#[async_trait]
impl AdvertisementSource for ReplaySource {
    async fn scan(&self, _duration: Duration) -> BluetoothResult<Vec<RawAdvertisement>> {
        if self.cycles.is_empty() {
            return Ok(Vec::new());
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.cycles.len();
        debug!(cycle = index, advertisements = self.cycles[index].len(), "Replaying scan cycle");
        Ok(self.cycles[index].clone())
    }
}

// ============================================================================
// Recording sink
// ============================================================================

/// Sink that records every trigger in memory.
#[cfg(any(test, feature = "mock-bluetooth"))]
#[derive(Debug, Default)]
pub struct MemorySink {
    triggers: std::sync::Mutex<Vec<Trigger>>,
}

#[cfg(any(test, feature = "mock-bluetooth"))]
impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Triggers recorded so far.
    #[must_use]
    pub fn triggers(&self) -> Vec<Trigger> {
        self.triggers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Names of triggers recorded so far.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.triggers().iter().map(|trigger| trigger.name).collect()
    }
}

#[cfg(any(test, feature = "mock-bluetooth"))]
impl EventSink for MemorySink {
    fn emit(&self, trigger: &Trigger) -> crate::Result<()> {
        self.triggers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(trigger.clone());
        Ok(())
    }
}

// ============================================================================
// Conversion helpers
// ============================================================================

const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;
const LOW_96_BITS: u128 = (1 << 96) - 1;

/// Render a service UUID the way advertisements are matched: 16-bit UUIDs on the
/// Bluetooth base as four lowercase hex digits, anything else hyphenated.
#[must_use]
pub fn shorten_service_uuid(uuid: &Uuid) -> String {
    let value = uuid.as_u128();
    if value & LOW_96_BITS == BLUETOOTH_BASE_UUID {
        if let Ok(short) = u16::try_from(value >> 96) {
            return format!("{short:04x}");
        }
    }
    uuid.hyphenated().to_string()
}

/// Manufacturer data as it appears on air: little-endian company id, then payload.
#[must_use]
pub fn manufacturer_bytes(company_id: u16, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(payload.len() + 2);
    bytes.extend_from_slice(&company_id.to_le_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

// ============================================================================
// BlueZ
// ============================================================================

#[cfg(feature = "bluetooth")]
pub use bluez::BluezScanner;

#[cfg(feature = "bluetooth")]
mod bluez {
    use std::time::Duration;

    use async_trait::async_trait;
    use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session};
    use futures::StreamExt;
    use tracing::{debug, info};

    use super::{
        manufacturer_bytes, shorten_service_uuid, AdvertisementSource, BluetoothError,
        BluetoothResult,
    };
    use crate::types::{AddressType, RawAdvertisement, ServiceData};

    impl From<bluer::Error> for BluetoothError {
        fn from(err: bluer::Error) -> Self {
            Self::DiscoveryFailed {
                message: err.to_string(),
            }
        }
    }

    /// Live advertisement source backed by BlueZ over D-Bus.
    ///
    /// Requires `bluetoothd` to be running.
    pub struct BluezScanner {
        _session: Session,
        adapter: Adapter,
    }

    impl std::fmt::Debug for BluezScanner {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("BluezScanner")
                .field("adapter", &self.adapter.name())
                .finish()
        }
    }

    impl BluezScanner {
        /// Open a session on the default adapter and power it on.
        ///
        /// # Errors
        ///
        /// Returns an error if BlueZ is unreachable or no adapter can be powered.
        pub async fn new() -> BluetoothResult<Self> {
            let session = Session::new()
                .await
                .map_err(|e| BluetoothError::SessionInitFailed {
                    message: e.to_string(),
                })?;
            let adapter = session
                .default_adapter()
                .await
                .map_err(|_| BluetoothError::AdapterNotFound)?;

            if !adapter.is_powered().await? {
                adapter
                    .set_powered(true)
                    .await
                    .map_err(|_| BluetoothError::AdapterPoweredOff)?;
            }

            adapter
                .set_discovery_filter(DiscoveryFilter {
                    transport: DiscoveryTransport::Le,
                    duplicate_data: true,
                    ..Default::default()
                })
                .await?;

            info!(adapter = adapter.name(), "Bluetooth adapter ready");
            Ok(Self {
                _session: session,
                adapter,
            })
        }

        async fn read_device(&self, address: Address) -> BluetoothResult<Option<RawAdvertisement>> {
            let device = self.adapter.device(address)?;

            // Cached devices that did not advertise during this scan carry no RSSI.
            let Some(rssi) = device.rssi().await? else {
                return Ok(None);
            };

            let address_type = match device.address_type().await? {
                bluer::AddressType::LeRandom => AddressType::Random,
                _ => AddressType::Public,
            };

            let manufacturer_data = device.manufacturer_data().await?.and_then(|data| {
                data.into_iter()
                    .min_by_key(|(company_id, _)| *company_id)
                    .map(|(company_id, payload)| manufacturer_bytes(company_id, &payload))
            });

            let mut service_data: Vec<ServiceData> = device
                .service_data()
                .await?
                .map(|data| {
                    data.into_iter()
                        .map(|(uuid, payload)| ServiceData::new(shorten_service_uuid(&uuid), payload))
                        .collect()
                })
                .unwrap_or_default();
            service_data.sort_by(|a, b| a.uuid.cmp(&b.uuid));

            Ok(Some(RawAdvertisement {
                local_name: device.name().await?,
                address: address.to_string(),
                address_type,
                rssi,
                manufacturer_data,
                service_data,
            }))
        }
    }

    #[async_trait]
    impl AdvertisementSource for BluezScanner {
        async fn scan(&self, duration: Duration) -> BluetoothResult<Vec<RawAdvertisement>> {
            let events = self.adapter.discover_devices().await?;
            futures::pin_mut!(events);

            let mut addresses: Vec<Address> = Vec::new();
            let deadline = tokio::time::sleep(duration);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    () = &mut deadline => break,
                    event = events.next() => match event {
                        Some(AdapterEvent::DeviceAdded(address)) => {
                            if !addresses.contains(&address) {
                                addresses.push(address);
                            }
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }

            let mut advertisements = Vec::with_capacity(addresses.len());
            for address in addresses {
                match self.read_device(address).await {
                    Ok(Some(advertisement)) => advertisements.push(advertisement),
                    Ok(None) => {}
                    Err(e) => debug!(%address, error = %e, "Skipping unreadable device"),
                }
            }

            debug!(count = advertisements.len(), "Scan complete");
            Ok(advertisements)
        }
    }
}
