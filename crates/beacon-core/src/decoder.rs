//! Beacon frame decoding.
//!
//! [`FrameDecoder`] classifies a [`RawAdvertisement`] into a [`Beacon`]. Frames are
//! tried in order (iBeacon, Eddystone, generic peripheral) and the first match
//! wins. Battery information is read independently of the frame type.
//!
//! Decoding is total: every fixed-length field is bounds-checked, and anything
//! that does not fit a known layout is a non-match for that frame type.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};
use uuid::Uuid;

use crate::distance::{DistanceEstimator, DistanceModel};
use crate::types::{AddressType, Beacon, BeaconKind, RawAdvertisement};

/// Apple company id (`0x004C`, little-endian) followed by the iBeacon type and length.
pub const IBEACON_PREFIX: [u8; 4] = [0x4C, 0x00, 0x02, 0x15];

/// Length of an iBeacon manufacturer-data block including the prefix.
pub const IBEACON_FRAME_LEN: usize = 25;

/// 16-bit service UUID of Eddystone.
pub const EDDYSTONE_SERVICE_UUID: &str = "feaa";

/// 16-bit service UUID of the GATT battery service.
pub const BATTERY_SERVICE_UUID: &str = "180f";

const EDDYSTONE_UID_FRAME: u8 = 0x00;
const EDDYSTONE_EID_FRAME: u8 = 0x30;
const EDDYSTONE_UID_FRAME_LEN: usize = 18;
const EDDYSTONE_EID_FRAME_LEN: usize = 10;

/// Minew devices announce battery in a proprietary service.
const MINEW_ADDRESS_PREFIX: &str = "AC:23:3F";
const MINEW_SERVICE_UUID: &str = "ffe1";
const MINEW_INFO_FRAME: u8 = 0xA1;

const MAX_BATTERY_PERCENT: u8 = 100;

/// Decoder settings, read from the per-cycle configuration snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecoderConfig {
    /// Accept random-address peripherals as identifiable devices.
    pub ignore_address_type: bool,

    /// Distance curve used when no custom estimator is installed.
    pub distance_model: DistanceModel,
}

/// Classifies raw advertisements into beacons.
///
/// Holds no mutable state; safe to share and call reentrantly.
#[derive(Clone)]
pub struct FrameDecoder {
    config: DecoderConfig,
    estimator: Arc<dyn DistanceEstimator>,
}

impl fmt::Debug for FrameDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameDecoder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DecoderConfig::default())
    }
}

/// Frame-level decode result before signal metadata is attached.
struct Frame {
    kind: BeaconKind,
    calibrated_power: Option<i8>,
}

impl FrameDecoder {
    /// Create a decoder using the configured distance model.
    #[must_use]
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            config,
            estimator: Arc::new(config.distance_model),
        }
    }

    /// Replace the distance curve with a custom estimator.
    #[must_use]
    pub fn with_estimator(mut self, estimator: Arc<dyn DistanceEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Current decoder settings.
    #[must_use]
    pub const fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decode every advertisement of a scan cycle.
    #[must_use]
    pub fn decode_all(&self, advertisements: &[RawAdvertisement]) -> Vec<Beacon> {
        advertisements.iter().map(|adv| self.decode(adv)).collect()
    }

    /// Decode one advertisement. Never fails; unrecognized frames are `Unknown`.
    #[must_use]
    pub fn decode(&self, adv: &RawAdvertisement) -> Beacon {
        let frame = decode_ibeacon(adv)
            .or_else(|| decode_eddystone(adv))
            .or_else(|| {
                self.decode_peripheral(adv).map(|kind| Frame {
                    kind,
                    calibrated_power: None,
                })
            })
            .unwrap_or(Frame {
                kind: BeaconKind::Unknown,
                calibrated_power: None,
            });

        let distance = frame
            .calibrated_power
            .and_then(|power| self.estimator.estimate(&frame.kind, adv.rssi, power));

        let beacon = Beacon {
            kind: frame.kind,
            address: adv.address.clone(),
            address_type: adv.address_type,
            name: adv.local_name.clone(),
            rssi: adv.rssi,
            calibrated_power: frame.calibrated_power,
            battery_level: battery_level(adv),
            distance,
        };

        trace!(
            address = %adv.address,
            kind = beacon.kind.type_name(),
            rssi = adv.rssi,
            calibrated_power = ?beacon.calibrated_power,
            battery = ?beacon.battery_level,
            "Decoded advertisement"
        );

        beacon
    }

    fn decode_peripheral(&self, adv: &RawAdvertisement) -> Option<BeaconKind> {
        let name = adv.local_name.as_deref().filter(|name| !name.is_empty())?;

        if adv.address_type == AddressType::Random && !self.config.ignore_address_type {
            debug!(
                address = %adv.address,
                name,
                "Ignoring peripheral with random address type"
            );
            return None;
        }

        Some(BeaconKind::GenericPeripheral {
            address: adv.address.clone(),
            name: name.to_string(),
            address_type: adv.address_type,
        })
    }
}

fn decode_ibeacon(adv: &RawAdvertisement) -> Option<Frame> {
    let data = adv.manufacturer_data.as_deref()?;
    let frame: &[u8; IBEACON_FRAME_LEN] = data.try_into().ok()?;
    if frame[..4] != IBEACON_PREFIX {
        return None;
    }

    let mut uuid = [0u8; 16];
    uuid.copy_from_slice(&frame[4..20]);

    Some(Frame {
        kind: BeaconKind::IBeacon {
            uuid: Uuid::from_bytes(uuid),
            major: u16::from_be_bytes([frame[20], frame[21]]),
            minor: u16::from_be_bytes([frame[22], frame[23]]),
        },
        calibrated_power: Some(i8::from_be_bytes([frame[24]])),
    })
}

fn decode_eddystone(adv: &RawAdvertisement) -> Option<Frame> {
    adv.service_payloads(EDDYSTONE_SERVICE_UUID)
        .find_map(parse_eddystone_id_frame)
}

/// Parse an Eddystone UID or EID frame. Other frame types (URL, TLM) are skipped.
///
/// An EID frame carries 8 identifier bytes; they are zero-padded into the
/// namespace and instance fields.
fn parse_eddystone_id_frame(data: &[u8]) -> Option<Frame> {
    let frame_type = data.first()? & 0xF0;
    let min_len = match frame_type {
        EDDYSTONE_UID_FRAME => EDDYSTONE_UID_FRAME_LEN,
        EDDYSTONE_EID_FRAME => EDDYSTONE_EID_FRAME_LEN,
        _ => return None,
    };
    if data.len() < min_len {
        return None;
    }

    let mut id = [0u8; EDDYSTONE_UID_FRAME_LEN - 2];
    let body = &data[2..data.len().min(EDDYSTONE_UID_FRAME_LEN)];
    id[..body.len()].copy_from_slice(body);

    let mut namespace = [0u8; 10];
    namespace.copy_from_slice(&id[..10]);
    let mut instance = [0u8; 6];
    instance.copy_from_slice(&id[10..]);

    let kind = match frame_type {
        EDDYSTONE_UID_FRAME => BeaconKind::EddystoneUid {
            namespace,
            instance,
        },
        EDDYSTONE_EID_FRAME => BeaconKind::EddystoneEid {
            namespace,
            instance,
        },
        _ => return None,
    };

    Some(Frame {
        kind,
        calibrated_power: Some(i8::from_be_bytes([data[1]])),
    })
}

/// Battery percentage, from the Minew vendor service or the GATT battery service.
fn battery_level(adv: &RawAdvertisement) -> Option<u8> {
    minew_battery_level(adv).or_else(|| {
        adv.service_payloads(BATTERY_SERVICE_UUID)
            .filter_map(|data| data.first().copied())
            .filter(|level| *level <= MAX_BATTERY_PERCENT)
            .last()
    })
}

fn minew_battery_level(adv: &RawAdvertisement) -> Option<u8> {
    let is_minew = adv
        .address
        .get(..MINEW_ADDRESS_PREFIX.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(MINEW_ADDRESS_PREFIX));
    if !is_minew {
        return None;
    }

    adv.service_payloads(MINEW_SERVICE_UUID)
        .filter(|data| data.first() == Some(&MINEW_INFO_FRAME))
        .filter_map(|data| data.get(2).copied())
        .filter(|level| *level <= MAX_BATTERY_PERCENT)
        .last()
}
