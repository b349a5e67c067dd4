//! Shared types for advertisements, beacons and device identities.
//!
//! A [`RawAdvertisement`] is what the host scanner hands us. The decoder turns it
//! into a [`Beacon`], whose [`BeaconKind`] carries the frame-specific fields and
//! whose [`IdentityKey`] decides whether two beacons are the same physical device.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for name-derived peripheral identities (UUIDv5).
pub const PERIPHERAL_NAME_NAMESPACE: Uuid = Uuid::from_u128(0x6b1e_c0a4_3f2d_4c55_9a0e_2b7f_41d8_93c6);

static MAC_ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9A-Fa-f]{2}[:-]){5}[0-9A-Fa-f]{2}$").expect("MAC address regex is valid")
});

/// Returns `true` if `address` looks like `AA:BB:CC:DD:EE:FF` (colons or dashes).
#[must_use]
pub fn is_valid_mac_address(address: &str) -> bool {
    MAC_ADDRESS_RE.is_match(address)
}

/// Normalizes a MAC address to uppercase, colon-separated form.
///
/// Returns `None` when the input is not a MAC address.
#[must_use]
pub fn normalize_mac_address(address: &str) -> Option<String> {
    if !is_valid_mac_address(address) {
        return None;
    }
    Some(address.replace('-', ":").to_ascii_uppercase())
}

// ============================================================================
// Raw advertisement input
// ============================================================================

/// BLE GAP address type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    /// IEEE-assigned public address; stable across advertisements.
    #[default]
    Public,
    /// Random address; may rotate and is not a stable identifier.
    Random,
}

impl AddressType {
    /// Lowercase name as used in settings.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Random => "random",
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One service-data entry of an advertisement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceData {
    /// Service UUID, 16-bit ones in short lowercase hex form (e.g. `feaa`).
    pub uuid: String,

    /// Raw service payload.
    #[serde(default)]
    pub data: Vec<u8>,
}

impl ServiceData {
    /// Create a service-data entry.
    pub fn new(uuid: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            uuid: uuid.into(),
            data: data.into(),
        }
    }

    /// Case-insensitive match against a short service UUID.
    #[must_use]
    pub fn is(&self, uuid: &str) -> bool {
        self.uuid.eq_ignore_ascii_case(uuid)
    }
}

/// A single advertisement as reported by the host scanner.
///
/// Immutable per scan cycle. `service_data` defaults to empty when the host
/// reports none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAdvertisement {
    /// Advertised local name.
    #[serde(default)]
    pub local_name: Option<String>,

    /// Device address as reported by the host.
    pub address: String,

    /// Address type of `address`.
    #[serde(default)]
    pub address_type: AddressType,

    /// Received signal strength in dBm.
    pub rssi: i16,

    /// Manufacturer-specific data, including the little-endian company id.
    #[serde(default)]
    pub manufacturer_data: Option<Vec<u8>>,

    /// Service data entries in advertised order.
    #[serde(default)]
    pub service_data: Vec<ServiceData>,
}

impl RawAdvertisement {
    /// Create an advertisement with only an address and RSSI.
    pub fn new(address: impl Into<String>, rssi: i16) -> Self {
        Self {
            local_name: None,
            address: address.into(),
            address_type: AddressType::Public,
            rssi,
            manufacturer_data: None,
            service_data: Vec::new(),
        }
    }

    /// Set the local name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = Some(name.into());
        self
    }

    /// Set the address type.
    #[must_use]
    pub const fn with_address_type(mut self, address_type: AddressType) -> Self {
        self.address_type = address_type;
        self
    }

    /// Set the manufacturer data.
    #[must_use]
    pub fn with_manufacturer_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.manufacturer_data = Some(data.into());
        self
    }

    /// Append a service-data entry.
    #[must_use]
    pub fn with_service_data(mut self, uuid: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.service_data.push(ServiceData::new(uuid, data));
        self
    }

    /// Payloads of every service-data entry matching `uuid`, in order.
    pub fn service_payloads<'a>(&'a self, uuid: &'a str) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.service_data
            .iter()
            .filter(move |entry| entry.is(uuid))
            .map(|entry| entry.data.as_slice())
    }
}

// ============================================================================
// Identity
// ============================================================================

/// Stable identity of a physical beacon.
///
/// Two beacons are the same device iff their identity keys are equal. Ephemeral
/// Eddystone-EID frames and random-address peripherals (unless explicitly
/// allowed) have no identity key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum IdentityKey {
    /// iBeacon proximity UUID, major and minor.
    #[serde(rename = "ibeacon")]
    IBeacon {
        /// Proximity UUID.
        uuid: Uuid,
        /// Major value.
        major: u16,
        /// Minor value.
        minor: u16,
    },

    /// Eddystone-UID namespace and instance.
    #[serde(rename = "eddystone_uid")]
    EddystoneUid {
        /// 10-byte namespace.
        #[serde(with = "hex_array")]
        namespace: [u8; 10],
        /// 6-byte instance.
        #[serde(with = "hex_array")]
        instance: [u8; 6],
    },

    /// Generic peripheral identified by its normalized MAC address.
    #[serde(rename = "peripheral")]
    Peripheral {
        /// Uppercase, colon-separated MAC address.
        address: String,
    },

    /// Generic peripheral without a usable address, identified by its name.
    #[serde(rename = "named_peripheral")]
    NamedPeripheral {
        /// UUIDv5 of the advertised name.
        uuid: Uuid,
    },
}

impl IdentityKey {
    /// Identity of a peripheral advertising `name` from `address`.
    ///
    /// Falls back to a name-derived UUID when `address` is not a MAC address.
    #[must_use]
    pub fn for_peripheral(address: &str, name: &str) -> Self {
        normalize_mac_address(address).map_or_else(
            || Self::NamedPeripheral {
                uuid: Uuid::new_v5(&PERIPHERAL_NAME_NAMESPACE, name.as_bytes()),
            },
            |address| Self::Peripheral { address },
        )
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IBeacon { uuid, major, minor } => {
                write!(f, "ibeacon:{}:{major}:{minor}", uuid.hyphenated())
            }
            Self::EddystoneUid {
                namespace,
                instance,
            } => write!(
                f,
                "eddystone:{}:{}",
                hex::encode(namespace),
                hex::encode(instance)
            ),
            Self::Peripheral { address } => write!(f, "peripheral:{address}"),
            Self::NamedPeripheral { uuid } => write!(f, "named:{}", uuid.hyphenated()),
        }
    }
}

/// Error returned when parsing an [`IdentityKey`] from its display form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid device identity '{0}'. Expected e.g. 'ibeacon:<uuid>:<major>:<minor>' or 'peripheral:<mac>'.")]
pub struct ParseIdentityError(pub String);

impl FromStr for IdentityKey {
    type Err = ParseIdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseIdentityError(s.to_string());
        let (kind, rest) = s.split_once(':').ok_or_else(invalid)?;

        match kind {
            "ibeacon" => {
                let mut parts = rest.rsplitn(3, ':');
                let minor = parts.next().and_then(|v| v.parse().ok()).ok_or_else(invalid)?;
                let major = parts.next().and_then(|v| v.parse().ok()).ok_or_else(invalid)?;
                let uuid = parts
                    .next()
                    .and_then(|v| Uuid::parse_str(v).ok())
                    .ok_or_else(invalid)?;
                Ok(Self::IBeacon { uuid, major, minor })
            }
            "eddystone" => {
                let (namespace, instance) = rest.split_once(':').ok_or_else(invalid)?;
                let mut ns = [0u8; 10];
                let mut inst = [0u8; 6];
                hex::decode_to_slice(namespace, &mut ns).map_err(|_| invalid())?;
                hex::decode_to_slice(instance, &mut inst).map_err(|_| invalid())?;
                Ok(Self::EddystoneUid {
                    namespace: ns,
                    instance: inst,
                })
            }
            "peripheral" => normalize_mac_address(rest)
                .map(|address| Self::Peripheral { address })
                .ok_or_else(invalid),
            "named" => Uuid::parse_str(rest)
                .map(|uuid| Self::NamedPeripheral { uuid })
                .map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

// ============================================================================
// Decoded beacons
// ============================================================================

/// Frame format of a decoded advertisement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BeaconKind {
    /// Apple iBeacon frame.
    #[serde(rename = "ibeacon")]
    IBeacon {
        /// Proximity UUID.
        uuid: Uuid,
        /// Major value.
        major: u16,
        /// Minor value.
        minor: u16,
    },

    /// Eddystone-UID frame.
    EddystoneUid {
        /// 10-byte namespace.
        #[serde(with = "hex_array")]
        namespace: [u8; 10],
        /// 6-byte instance.
        #[serde(with = "hex_array")]
        instance: [u8; 6],
    },

    /// Eddystone-EID frame. The identifier rotates, so it never yields an identity.
    EddystoneEid {
        /// 10-byte namespace field.
        #[serde(with = "hex_array")]
        namespace: [u8; 10],
        /// 6-byte instance field.
        #[serde(with = "hex_array")]
        instance: [u8; 6],
    },

    /// Named peripheral without a recognized beacon frame.
    GenericPeripheral {
        /// Device address.
        address: String,
        /// Advertised local name.
        name: String,
        /// Address type.
        address_type: AddressType,
    },

    /// No recognizable frame.
    Unknown,
}

impl BeaconKind {
    /// Stable identity for this frame, if it has one.
    #[must_use]
    pub fn identity(&self) -> Option<IdentityKey> {
        match self {
            Self::IBeacon { uuid, major, minor } => Some(IdentityKey::IBeacon {
                uuid: *uuid,
                major: *major,
                minor: *minor,
            }),
            Self::EddystoneUid {
                namespace,
                instance,
            } => Some(IdentityKey::EddystoneUid {
                namespace: *namespace,
                instance: *instance,
            }),
            Self::GenericPeripheral { address, name, .. } => {
                Some(IdentityKey::for_peripheral(address, name))
            }
            Self::EddystoneEid { .. } | Self::Unknown => None,
        }
    }

    /// Human-readable frame type.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::IBeacon { .. } => "iBeacon",
            Self::EddystoneUid { .. } => "Eddystone UID",
            Self::EddystoneEid { .. } => "Eddystone EID",
            Self::GenericPeripheral { .. } => "Generic peripheral",
            Self::Unknown => "Unknown",
        }
    }
}

/// A decoded advertisement. Rebuilt every scan cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beacon {
    /// Frame format and frame-specific fields.
    pub kind: BeaconKind,

    /// Source address of the advertisement.
    pub address: String,

    /// Source address type.
    pub address_type: AddressType,

    /// Advertised local name.
    pub name: Option<String>,

    /// Received signal strength in dBm.
    pub rssi: i16,

    /// Calibrated transmit power in dBm (at 1 m for iBeacon, 0 m for Eddystone).
    pub calibrated_power: Option<i8>,

    /// Battery level in percent.
    pub battery_level: Option<u8>,

    /// Estimated distance in metres, when calibrated power is known.
    pub distance: Option<f64>,
}

impl Beacon {
    /// Stable identity of this beacon, if any.
    #[must_use]
    pub fn identity_key(&self) -> Option<IdentityKey> {
        self.kind.identity()
    }

    /// Whether the beacon can be paired or matched against known devices.
    #[must_use]
    pub fn is_identifiable(&self) -> bool {
        self.identity_key().is_some()
    }
}

// ============================================================================
// Capabilities
// ============================================================================

/// A device capability identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Capability {
    /// Debounced in-range flag.
    Detect,
    /// Last RSSI.
    SignalStrength,
    /// Estimated distance.
    HomeyDistance,
    /// Battery percentage.
    MeasureBattery,
    /// Identifier this platform does not know.
    Unknown(String),
}

impl Capability {
    /// Wire identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Detect => "detect",
            Self::SignalStrength => "signal_strength",
            Self::HomeyDistance => "homey_distance",
            Self::MeasureBattery => "measure_battery",
            Self::Unknown(id) => id,
        }
    }

    /// Whether this is a capability the platform knows.
    #[must_use]
    pub const fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl From<&str> for Capability {
    fn from(id: &str) -> Self {
        match id {
            "detect" => Self::Detect,
            "signal_strength" => Self::SignalStrength,
            "homey_distance" => Self::HomeyDistance,
            "measure_battery" => Self::MeasureBattery,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl From<String> for Capability {
    fn from(id: String) -> Self {
        Self::from(id.as_str())
    }
}

impl From<Capability> for String {
    fn from(capability: Capability) -> Self {
        match capability {
            Capability::Unknown(id) => id,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serde helpers storing fixed-size byte identifiers as lowercase hex.
mod hex_array {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let mut out = [0u8; N];
        hex::decode_to_slice(&s, &mut out).map_err(serde::de::Error::custom)?;
        Ok(out)
    }
}
