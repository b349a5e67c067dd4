//! Pairing metadata extraction.
//!
//! Turns a decoded [`Beacon`] into the user-facing record a host needs to pair it:
//! display name, settings, capability list and energy model. Everything here is
//! pure and never touches persisted state.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::types::{AddressType, Beacon, BeaconKind, Capability, IdentityKey};

/// Device settings, keyed by setting name.
pub type Settings = BTreeMap<String, String>;

/// Setting names written by the extractor.
pub mod setting {
    /// Device address, or `random` for random address types.
    pub const ADDRESS: &str = "address";
    /// Advertised local name, or `-`.
    pub const ADVERTISED_NAME: &str = "advertised_name";
    /// Calibrated power, e.g. `-59 dBm`, or `-`.
    pub const CALIBRATED_POWER: &str = "calibrated_power";
    /// Frame-specific identifiers in display form.
    pub const FRAME_DETAIL: &str = "frame_detail";
    /// Recognized vendor model, or `-`.
    pub const MODEL: &str = "model";
    /// Recognized vendor, or `-`.
    pub const MANUFACTURER: &str = "manufacturer";
    /// Frame type name.
    pub const TYPE_NAME: &str = "type_name";
}

/// Placeholder for settings with no value.
pub const NO_VALUE: &str = "-";

// ============================================================================
// Energy model
// ============================================================================

/// Battery types known to the energy model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BatteryType {
    /// CR2477 coin cell.
    Cr2477,
    /// AA cell.
    Aa,
    /// CR123A cell.
    Cr123a,
    /// CR2032 coin cell.
    Cr2032,
    /// Non-replaceable internal battery.
    Internal,
    /// Battery of unknown type.
    Other,
}

/// Constant power draw of a mains-powered device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerApproximation {
    /// Usage in watts.
    pub usage_constant: f64,
}

/// Energy model of a device: its batteries, or a power approximation.
///
/// Compared structurally; an absent profile equals the empty one.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EnergyProfile {
    /// Installed batteries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub batteries: Vec<BatteryType>,

    /// Power approximation for devices without batteries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approximation: Option<PowerApproximation>,
}

impl EnergyProfile {
    /// Battery-powered profile.
    #[must_use]
    pub fn batteries(batteries: &[BatteryType]) -> Self {
        Self {
            batteries: batteries.to_vec(),
            approximation: None,
        }
    }

    /// Constant-draw profile.
    #[must_use]
    pub const fn approximation(usage_constant: f64) -> Self {
        Self {
            batteries: Vec::new(),
            approximation: Some(PowerApproximation { usage_constant }),
        }
    }

    /// Whether the profile carries no information.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batteries.is_empty() && self.approximation.is_none()
    }
}

// ============================================================================
// Vendor models
// ============================================================================

/// How a vendor model is powered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PowerSource {
    /// Runs on the listed batteries.
    Batteries(&'static [BatteryType]),
    /// Mains powered with the given draw in watts.
    Approximation(f64),
}

/// A recognized vendor model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VendorModel {
    /// Vendor name, also the advertised-name prefix.
    pub manufacturer: &'static str,
    /// Model code in the second dash-separated field of the name.
    pub code: &'static str,
    /// Model name.
    pub model: &'static str,
    /// Power source.
    pub power: PowerSource,
}

impl VendorModel {
    /// Energy profile of this model.
    #[must_use]
    pub fn energy(&self) -> EnergyProfile {
        match self.power {
            PowerSource::Batteries(batteries) => EnergyProfile::batteries(batteries),
            PowerSource::Approximation(watts) => EnergyProfile::approximation(watts),
        }
    }

    /// Whether the model reports a battery level.
    #[must_use]
    pub const fn has_battery(&self) -> bool {
        matches!(self.power, PowerSource::Batteries(_))
    }
}

const BLUEUP: &str = "BlueUp";

/// BlueUp models, advertised as `BlueUp-<code>-<serial>`.
pub const BLUEUP_MODELS: &[VendorModel] = &[
    VendorModel {
        manufacturer: BLUEUP,
        code: "01",
        model: "Mini",
        power: PowerSource::Batteries(&[BatteryType::Cr2477]),
    },
    VendorModel {
        manufacturer: BLUEUP,
        code: "02",
        model: "Maxi",
        power: PowerSource::Batteries(&[BatteryType::Aa, BatteryType::Aa]),
    },
    VendorModel {
        manufacturer: BLUEUP,
        code: "04",
        model: "Forte",
        power: PowerSource::Batteries(&[BatteryType::Cr123a]),
    },
    VendorModel {
        manufacturer: BLUEUP,
        code: "05",
        model: "Tag",
        power: PowerSource::Batteries(&[BatteryType::Cr2032, BatteryType::Cr2032]),
    },
    VendorModel {
        manufacturer: BLUEUP,
        code: "06",
        model: "Board",
        power: PowerSource::Approximation(0.03),
    },
    VendorModel {
        manufacturer: BLUEUP,
        code: "07",
        model: "Sensor",
        power: PowerSource::Batteries(&[BatteryType::Aa, BatteryType::Aa]),
    },
    VendorModel {
        manufacturer: BLUEUP,
        code: "08",
        model: "Card",
        power: PowerSource::Batteries(&[BatteryType::Internal]),
    },
];

/// Look up a vendor model from an advertised name.
///
/// Only exact table entries match; nothing is inferred.
#[must_use]
pub fn lookup_vendor_model(name: &str) -> Option<&'static VendorModel> {
    if !name.starts_with(BLUEUP) {
        return None;
    }
    let fields: Vec<&str> = name.split('-').collect();
    let [_, code, _] = fields.as_slice() else {
        return None;
    };
    BLUEUP_MODELS.iter().find(|model| model.code == *code)
}

// ============================================================================
// Metadata
// ============================================================================

/// Everything needed to pair a beacon with the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairingMetadata {
    /// Display name.
    pub name: String,

    /// Stable identity.
    pub identity: IdentityKey,

    /// Device settings.
    pub settings: Settings,

    /// Capabilities in display order.
    pub capabilities: Vec<Capability>,

    /// Energy model, if known.
    pub energy: Option<EnergyProfile>,

    /// Calibrated power store value.
    pub calibrated_power: Option<i8>,
}

/// Extract pairing metadata from a beacon.
///
/// Returns `None` for beacons without a stable identity.
#[must_use]
pub fn extract_metadata(beacon: &Beacon) -> Option<PairingMetadata> {
    let identity = beacon.identity_key()?;

    let advertised_name = beacon.name.as_deref().filter(|name| !name.is_empty());
    let vendor = advertised_name.and_then(lookup_vendor_model);

    let mut capabilities = vec![Capability::Detect, Capability::SignalStrength];
    let mut energy = None;

    if let Some(model) = vendor {
        if model.has_battery() {
            capabilities.push(Capability::MeasureBattery);
        }
        energy = Some(model.energy());
    } else if beacon.battery_level.is_some() {
        capabilities.push(Capability::MeasureBattery);
        energy = Some(EnergyProfile::batteries(&[BatteryType::Other]));
    }

    if beacon.calibrated_power.is_some_and(|power| power != 0) {
        capabilities.push(Capability::HomeyDistance);
    }

    let address = match beacon.address_type {
        AddressType::Random => AddressType::Random.as_str().to_string(),
        AddressType::Public => beacon.address.clone(),
    };

    let mut settings = Settings::new();
    settings.insert(setting::ADDRESS.into(), address);
    settings.insert(
        setting::ADVERTISED_NAME.into(),
        advertised_name.unwrap_or(NO_VALUE).to_string(),
    );
    settings.insert(
        setting::CALIBRATED_POWER.into(),
        beacon
            .calibrated_power
            .map_or_else(|| NO_VALUE.to_string(), |power| format!("{power} dBm")),
    );
    settings.insert(setting::FRAME_DETAIL.into(), frame_detail(&beacon.kind));
    settings.insert(
        setting::MODEL.into(),
        vendor.map_or(NO_VALUE, |model| model.model).to_string(),
    );
    settings.insert(
        setting::MANUFACTURER.into(),
        vendor.map_or(NO_VALUE, |model| model.manufacturer).to_string(),
    );
    settings.insert(setting::TYPE_NAME.into(), beacon.kind.type_name().to_string());

    Some(PairingMetadata {
        name: display_name(beacon, advertised_name),
        identity,
        settings,
        capabilities,
        energy,
        calibrated_power: beacon.calibrated_power,
    })
}

/// Metadata for identifiable beacons that are not yet paired.
///
/// Duplicates of one identity within a cycle collapse to the first occurrence.
#[must_use]
pub fn pairing_candidates(beacons: &[Beacon], paired: &HashSet<IdentityKey>) -> Vec<PairingMetadata> {
    let mut seen = HashSet::new();
    beacons
        .iter()
        .filter_map(extract_metadata)
        .filter(|metadata| !paired.contains(&metadata.identity))
        .filter(|metadata| seen.insert(metadata.identity.clone()))
        .collect()
}

fn display_name(beacon: &Beacon, advertised_name: Option<&str>) -> String {
    if let Some(name) = advertised_name {
        return name.to_string();
    }
    match &beacon.kind {
        BeaconKind::IBeacon { uuid, major, minor } => {
            format!("{} {major} {minor}", uuid.simple())
        }
        BeaconKind::EddystoneUid {
            namespace,
            instance,
        } => format!("{} {}", hex::encode(namespace), hex::encode(instance)),
        _ => beacon.address.clone(),
    }
}

fn frame_detail(kind: &BeaconKind) -> String {
    match kind {
        BeaconKind::IBeacon { uuid, major, minor } => {
            format!("UUID: {} Major: {major} Minor: {minor}", uuid.hyphenated())
        }
        BeaconKind::EddystoneUid {
            namespace,
            instance,
        }
        | BeaconKind::EddystoneEid {
            namespace,
            instance,
        } => format!(
            "Namespace: {} Instance: {}",
            hex::encode(namespace),
            hex::encode(instance)
        ),
        BeaconKind::GenericPeripheral { .. } | BeaconKind::Unknown => NO_VALUE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ibeacon(name: Option<&str>, battery: Option<u8>) -> Beacon {
        Beacon {
            kind: BeaconKind::IBeacon {
                uuid: Uuid::from_u128(0xf7826da6_4fa2_4e98_8024_bc5b71e0893e),
                major: 1,
                minor: 2,
            },
            address: "11:22:33:44:55:66".into(),
            address_type: AddressType::Public,
            name: name.map(str::to_string),
            rssi: -70,
            calibrated_power: Some(-59),
            battery_level: battery,
            distance: Some(1.5),
        }
    }

    fn peripheral(name: &str, address_type: AddressType) -> Beacon {
        Beacon {
            kind: BeaconKind::GenericPeripheral {
                address: "AA:BB:CC:DD:EE:FF".into(),
                name: name.into(),
                address_type,
            },
            address: "AA:BB:CC:DD:EE:FF".into(),
            address_type,
            name: Some(name.into()),
            rssi: -80,
            calibrated_power: None,
            battery_level: None,
            distance: None,
        }
    }

    #[test]
    fn test_base_capabilities_for_plain_peripheral() {
        let metadata = extract_metadata(&peripheral("iTag", AddressType::Public)).unwrap();
        assert_eq!(
            metadata.capabilities,
            vec![Capability::Detect, Capability::SignalStrength]
        );
        assert_eq!(metadata.energy, None);
        assert_eq!(metadata.name, "iTag");
        assert_eq!(metadata.settings[setting::FRAME_DETAIL], NO_VALUE);
        assert_eq!(metadata.settings[setting::ADDRESS], "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_ibeacon_without_name_synthesizes_display_name() {
        let metadata = extract_metadata(&ibeacon(None, None)).unwrap();
        assert_eq!(metadata.name, "f7826da64fa24e988024bc5b71e0893e 1 2");
        assert_eq!(
            metadata.settings[setting::FRAME_DETAIL],
            "UUID: f7826da6-4fa2-4e98-8024-bc5b71e0893e Major: 1 Minor: 2"
        );
        assert_eq!(metadata.settings[setting::ADVERTISED_NAME], NO_VALUE);
        assert_eq!(metadata.settings[setting::CALIBRATED_POWER], "-59 dBm");
        assert_eq!(
            metadata.capabilities,
            vec![
                Capability::Detect,
                Capability::SignalStrength,
                Capability::HomeyDistance
            ]
        );
    }

    #[test]
    fn test_eddystone_display_name_and_detail() {
        let beacon = Beacon {
            kind: BeaconKind::EddystoneUid {
                namespace: [0xaa; 10],
                instance: [0x01, 0x02, 0x03, 0x04, 0x05, 0x06],
            },
            address: "11:22:33:44:55:66".into(),
            address_type: AddressType::Public,
            name: None,
            rssi: -70,
            calibrated_power: Some(-20),
            battery_level: None,
            distance: None,
        };
        let metadata = extract_metadata(&beacon).unwrap();
        assert_eq!(metadata.name, "aaaaaaaaaaaaaaaaaaaa 010203040506");
        assert_eq!(
            metadata.settings[setting::FRAME_DETAIL],
            "Namespace: aaaaaaaaaaaaaaaaaaaa Instance: 010203040506"
        );
    }

    #[test]
    fn test_zero_calibrated_power_has_no_distance_capability() {
        let mut beacon = ibeacon(None, None);
        beacon.calibrated_power = Some(0);
        beacon.distance = None;
        let metadata = extract_metadata(&beacon).unwrap();
        assert_eq!(
            metadata.capabilities,
            vec![Capability::Detect, Capability::SignalStrength]
        );
    }

    #[test]
    fn test_battery_reading_adds_other_battery() {
        let metadata = extract_metadata(&ibeacon(Some("Kontakt"), Some(80))).unwrap();
        assert!(metadata.capabilities.contains(&Capability::MeasureBattery));
        assert_eq!(
            metadata.energy,
            Some(EnergyProfile::batteries(&[BatteryType::Other]))
        );
        assert_eq!(metadata.settings[setting::MODEL], NO_VALUE);
    }

    #[test]
    fn test_blueup_vendor_models() {
        let metadata = extract_metadata(&ibeacon(Some("BlueUp-05-0123"), None)).unwrap();
        assert_eq!(metadata.settings[setting::MODEL], "Tag");
        assert_eq!(metadata.settings[setting::MANUFACTURER], "BlueUp");
        assert_eq!(
            metadata.energy,
            Some(EnergyProfile::batteries(&[
                BatteryType::Cr2032,
                BatteryType::Cr2032
            ]))
        );
        assert_eq!(
            metadata.capabilities,
            vec![
                Capability::Detect,
                Capability::SignalStrength,
                Capability::MeasureBattery,
                Capability::HomeyDistance
            ]
        );
    }

    #[test]
    fn test_blueup_board_has_no_battery_capability() {
        let metadata = extract_metadata(&ibeacon(Some("BlueUp-06-0001"), Some(100))).unwrap();
        assert!(!metadata.capabilities.contains(&Capability::MeasureBattery));
        assert_eq!(metadata.energy, Some(EnergyProfile::approximation(0.03)));
    }

    #[test]
    fn test_vendor_lookup_requires_exact_shape() {
        assert!(lookup_vendor_model("BlueUp-01-0001").is_some());
        assert!(lookup_vendor_model("BlueUp-01").is_none());
        assert!(lookup_vendor_model("BlueUp-01-0001-x").is_none());
        assert!(lookup_vendor_model("BlueUp-03-0001").is_none());
        assert!(lookup_vendor_model("Acme-01-0001").is_none());
    }

    #[test]
    fn test_random_address_is_stored_as_literal() {
        let metadata = extract_metadata(&peripheral("Phone", AddressType::Random)).unwrap();
        assert_eq!(metadata.settings[setting::ADDRESS], "random");
    }

    #[test]
    fn test_unidentifiable_beacons_have_no_metadata() {
        let mut beacon = peripheral("x", AddressType::Public);
        beacon.kind = BeaconKind::Unknown;
        assert!(extract_metadata(&beacon).is_none());

        beacon.kind = BeaconKind::EddystoneEid {
            namespace: [0; 10],
            instance: [0; 6],
        };
        assert!(extract_metadata(&beacon).is_none());
    }

    #[test]
    fn test_pairing_candidates_skip_paired_and_duplicates() {
        let known = ibeacon(Some("known"), None);
        let mut paired = HashSet::new();
        paired.insert(known.identity_key().unwrap());

        let fresh = peripheral("iTag", AddressType::Public);
        let beacons = vec![known, fresh.clone(), fresh];
        let candidates = pairing_candidates(&beacons, &paired);

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name, "iTag");
    }

    #[test]
    fn test_energy_profile_serialization_shape() {
        let json = serde_json::to_value(EnergyProfile::batteries(&[BatteryType::Cr123a])).unwrap();
        assert_eq!(json, serde_json::json!({ "batteries": ["CR123A"] }));

        let json = serde_json::to_value(EnergyProfile::approximation(0.03)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "approximation": { "usageConstant": 0.03 } })
        );
    }
}
