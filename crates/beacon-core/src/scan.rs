//! Scan cycle orchestration.
//!
//! [`ScanService`] owns the decoder and the presence tracker and runs one cycle at
//! a time: scan, decode, update presence, compute capability readings, deliver
//! triggers. The collaborator schedules the next cycle only after the previous one
//! returned, so cycles never overlap.
//!
//! The service also keeps the beacons of the most recent cycle, which back the
//! pairing list and the repair flow.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bluetooth::{AdvertisementSource, BluetoothError, EventSink};
use crate::config::ScanConfig;
use crate::decoder::FrameDecoder;
use crate::distance::DistanceEstimator;
use crate::error::{BeaconError, Result};
use crate::metadata::{extract_metadata, pairing_candidates, PairingMetadata};
use crate::presence::{PresenceTracker, TransitionEvent};
use crate::reconcile::{reconcile, DeviceProfile, ProfileDelta};
use crate::storage::PairedDevice;
use crate::types::{Beacon, Capability, IdentityKey, RawAdvertisement};

/// Upper bound on the extra time a source gets beyond the requested scan duration.
const MAX_SCAN_GRACE: Duration = Duration::from_secs(2);

/// A new value for one capability of one device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "capability", content = "value", rename_all = "snake_case")]
pub enum Reading {
    /// Debounced presence.
    Detect(bool),
    /// Last RSSI in dBm.
    SignalStrength(i16),
    /// Estimated distance in metres.
    HomeyDistance(f64),
    /// Battery percentage.
    MeasureBattery(u8),
}

impl Reading {
    /// Capability this reading updates.
    #[must_use]
    pub const fn capability(&self) -> Capability {
        match self {
            Self::Detect(_) => Capability::Detect,
            Self::SignalStrength(_) => Capability::SignalStrength,
            Self::HomeyDistance(_) => Capability::HomeyDistance,
            Self::MeasureBattery(_) => Capability::MeasureBattery,
        }
    }
}

/// A capability value change for a paired device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityUpdate {
    /// Device identity.
    pub device: IdentityKey,

    /// New value.
    pub reading: Reading,
}

/// Outcome of one scan cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Number of raw advertisements heard.
    pub advertisements: usize,

    /// Decoded beacons.
    pub beacons: Vec<Beacon>,

    /// Confirmed presence changes.
    pub transitions: Vec<TransitionEvent>,

    /// Capability values that changed.
    pub updates: Vec<CapabilityUpdate>,

    /// Whether the scan failed or timed out and was treated as empty.
    pub scan_failed: bool,
}

#[derive(Debug, Clone, Default)]
struct LastReadings {
    signal_strength: Option<i16>,
    distance: Option<f64>,
    battery: Option<u8>,
}

#[derive(Debug, Clone, Default)]
struct DeviceEntry {
    capabilities: Option<Vec<Capability>>,
    last: LastReadings,
}

impl DeviceEntry {
    fn supports(&self, capability: &Capability) -> bool {
        self.capabilities
            .as_ref()
            .map_or(true, |capabilities| capabilities.contains(capability))
    }
}

/// Drives scan cycles for the set of paired devices.
pub struct ScanService {
    decoder: FrameDecoder,
    estimator: Option<Arc<dyn DistanceEstimator>>,
    tracker: PresenceTracker,
    devices: HashMap<IdentityKey, DeviceEntry>,
    last_beacons: Vec<Beacon>,
    scan_timeout: Duration,
}

impl std::fmt::Debug for ScanService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanService")
            .field("decoder", &self.decoder)
            .field("tracker", &self.tracker)
            .field("scan_timeout", &self.scan_timeout)
            .finish_non_exhaustive()
    }
}

impl ScanService {
    /// Create a service from the scan settings.
    #[must_use]
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            decoder: FrameDecoder::new(config.decoder_config()),
            estimator: None,
            tracker: PresenceTracker::new(config.thresholds()),
            devices: HashMap::new(),
            last_beacons: Vec::new(),
            scan_timeout: config.scan_timeout(),
        }
    }

    /// Replace the distance curve with a custom estimator.
    #[must_use]
    pub fn with_estimator(mut self, estimator: Arc<dyn DistanceEstimator>) -> Self {
        self.decoder = self.decoder.with_estimator(Arc::clone(&estimator));
        self.estimator = Some(estimator);
        self
    }

    /// Apply a fresh settings snapshot before the next cycle.
    pub fn apply_config(&mut self, config: &ScanConfig) {
        let mut decoder = FrameDecoder::new(config.decoder_config());
        if let Some(estimator) = &self.estimator {
            decoder = decoder.with_estimator(Arc::clone(estimator));
        }
        self.decoder = decoder;
        self.tracker.set_thresholds(config.thresholds());
        self.scan_timeout = config.scan_timeout();
    }

    /// Presence tracker.
    #[must_use]
    pub const fn tracker(&self) -> &PresenceTracker {
        &self.tracker
    }

    /// Start tracking a device. Readings are reported for every capability.
    pub fn track(&mut self, identity: IdentityKey, name: impl Into<String>, detected: Option<bool>) {
        self.tracker.track(identity.clone(), name, detected);
        self.devices.entry(identity).or_default();
    }

    /// Start tracking a paired device, restoring its last `detect` value and
    /// limiting readings to its stored capabilities.
    pub fn track_paired(&mut self, device: &PairedDevice) {
        self.tracker
            .track(device.identity.clone(), device.name.clone(), device.detected);
        self.devices.entry(device.identity.clone()).or_default().capabilities =
            Some(device.profile.capabilities.clone());
    }

    /// Make the tracked set match `devices`: new devices are tracked, removed
    /// ones dropped, and stored capabilities refreshed. Presence state of devices
    /// that stay is kept.
    pub fn sync_paired(&mut self, devices: &[PairedDevice]) {
        let keep: HashSet<&IdentityKey> = devices.iter().map(|device| &device.identity).collect();
        let stale: Vec<IdentityKey> = self
            .devices
            .keys()
            .filter(|identity| !keep.contains(identity))
            .cloned()
            .collect();
        for identity in stale {
            debug!(%identity, "No longer paired, untracking");
            self.untrack(&identity);
        }
        for device in devices {
            self.track_paired(device);
        }
    }

    /// Stop tracking a device.
    pub fn untrack(&mut self, identity: &IdentityKey) -> bool {
        self.devices.remove(identity);
        self.tracker.untrack(identity)
    }

    /// Beacons of the most recent cycle.
    #[must_use]
    pub fn last_beacons(&self) -> &[Beacon] {
        &self.last_beacons
    }

    fn scan_deadline(&self) -> Duration {
        self.scan_timeout + (self.scan_timeout / 10).min(MAX_SCAN_GRACE)
    }

    async fn scan(&self, source: &dyn AdvertisementSource) -> Result<Vec<RawAdvertisement>> {
        match tokio::time::timeout(self.scan_deadline(), source.scan(self.scan_timeout)).await {
            Ok(Ok(advertisements)) => Ok(advertisements),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(BluetoothError::ScanTimeout {
                duration_ms: u64::try_from(self.scan_deadline().as_millis()).unwrap_or(u64::MAX),
            }
            .into()),
        }
    }

    /// Run one full cycle: scan, decode, update presence, deliver triggers.
    ///
    /// A failed or timed-out scan is treated as a cycle with no advertisements.
    /// Sink failures are logged and do not abort the cycle.
    pub async fn run_cycle(
        &mut self,
        source: &dyn AdvertisementSource,
        sink: &dyn EventSink,
    ) -> CycleReport {
        let (advertisements, scan_failed) = match self.scan(source).await {
            Ok(advertisements) => (advertisements, false),
            Err(e) => {
                warn!(error = %e, "Scan failed, treating cycle as empty");
                (Vec::new(), true)
            }
        };

        let mut report = self.process(&advertisements);
        report.scan_failed = scan_failed;

        for transition in &report.transitions {
            for trigger in transition.triggers() {
                if let Err(e) = sink.emit(&trigger) {
                    warn!(trigger = trigger.name, device = %transition.name, error = %e, "Failed to deliver trigger");
                }
            }
        }

        report
    }

    /// Process one cycle of advertisements without scanning.
    pub fn process(&mut self, advertisements: &[RawAdvertisement]) -> CycleReport {
        let beacons = self.decoder.decode_all(advertisements);
        for beacon in &beacons {
            debug!(
                kind = beacon.kind.type_name(),
                address = %beacon.address,
                rssi = beacon.rssi,
                identity = ?beacon.identity_key().map(|key| key.to_string()),
                "Beacon decoded"
            );
        }

        let before: HashMap<IdentityKey, Option<bool>> = self
            .tracker
            .identities()
            .map(|identity| {
                let detected = self.tracker.state(identity).and_then(|state| state.detected());
                (identity.clone(), detected)
            })
            .collect();

        let transitions = self.tracker.update(&beacons);

        let mut updates = Vec::new();
        for (identity, previous) in &before {
            let current = self.tracker.state(identity).and_then(|state| state.detected());
            if let Some(detected) = current.filter(|&detected| Some(detected) != *previous) {
                updates.push(CapabilityUpdate {
                    device: identity.clone(),
                    reading: Reading::Detect(detected),
                });
            }
        }
        updates.extend(self.readings(&beacons));

        info!(
            advertisements = advertisements.len(),
            beacons = beacons.len(),
            transitions = transitions.len(),
            updates = updates.len(),
            "Scan cycle complete"
        );

        self.last_beacons.clone_from(&beacons);
        CycleReport {
            advertisements: advertisements.len(),
            beacons,
            transitions,
            updates,
            scan_failed: false,
        }
    }

    fn readings(&mut self, beacons: &[Beacon]) -> Vec<CapabilityUpdate> {
        let mut updates = Vec::new();

        for (identity, entry) in &mut self.devices {
            let Some(beacon) = beacons
                .iter()
                .find(|beacon| beacon.identity_key().as_ref() == Some(identity))
            else {
                continue;
            };

            let mut changed = Vec::new();
            if entry.last.signal_strength != Some(beacon.rssi) {
                entry.last.signal_strength = Some(beacon.rssi);
                changed.push(Reading::SignalStrength(beacon.rssi));
            }
            if let Some(distance) = beacon.distance {
                if entry.last.distance != Some(distance) {
                    entry.last.distance = Some(distance);
                    changed.push(Reading::HomeyDistance(distance));
                }
            }
            if let Some(battery) = beacon.battery_level {
                if entry.last.battery != Some(battery) {
                    entry.last.battery = Some(battery);
                    changed.push(Reading::MeasureBattery(battery));
                }
            }

            updates.extend(
                changed
                    .into_iter()
                    .filter(|reading| entry.supports(&reading.capability()))
                    .map(|reading| CapabilityUpdate {
                        device: identity.clone(),
                        reading,
                    }),
            );
        }

        updates
    }

    /// Pairing metadata for beacons of the last cycle that are not yet paired.
    #[must_use]
    pub fn pairing_candidates(&self, paired: &HashSet<IdentityKey>) -> Vec<PairingMetadata> {
        pairing_candidates(&self.last_beacons, paired)
    }

    /// Run a discovery scan and list unpaired devices.
    ///
    /// Presence state is not advanced.
    ///
    /// # Errors
    ///
    /// Returns the scan error, or [`BeaconError::NoDevicesFound`] if no
    /// unpaired identifiable beacon was heard.
    pub async fn discover(
        &mut self,
        source: &dyn AdvertisementSource,
        paired: &HashSet<IdentityKey>,
    ) -> Result<Vec<PairingMetadata>> {
        let advertisements = self.scan(source).await?;
        self.last_beacons = self.decoder.decode_all(&advertisements);

        let candidates = self.pairing_candidates(paired);
        if candidates.is_empty() {
            return Err(BeaconError::NoDevicesFound);
        }
        info!(count = candidates.len(), "Discovered pairable devices");
        Ok(candidates)
    }

    /// Reconcile a stored profile against the device as seen in the last cycle.
    ///
    /// Returns `None` if the device was not seen.
    #[must_use]
    pub fn refresh_device(
        &self,
        identity: &IdentityKey,
        stored: &DeviceProfile,
    ) -> Option<ProfileDelta> {
        let fresh = self
            .last_beacons
            .iter()
            .filter(|beacon| beacon.identity_key().as_ref() == Some(identity))
            .find_map(extract_metadata)?;

        let delta = reconcile(&fresh, stored);
        if delta.changed {
            info!(device = %fresh.name, %identity, "Device profile out of date");
        }
        Some(delta)
    }

    /// Run a discovery scan, then reconcile the device's stored profile.
    ///
    /// # Errors
    ///
    /// Returns the scan error, or [`BeaconError::DeviceNotFound`] if the device
    /// was not heard.
    pub async fn discover_and_refresh(
        &mut self,
        source: &dyn AdvertisementSource,
        identity: &IdentityKey,
        stored: &DeviceProfile,
    ) -> Result<ProfileDelta> {
        let advertisements = self.scan(source).await?;
        self.last_beacons = self.decoder.decode_all(&advertisements);
        self.refresh_device(identity, stored)
            .ok_or_else(|| BeaconError::DeviceNotFound(identity.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::{BluetoothResult, MemorySink, ReplaySource};
    use crate::metadata::EnergyProfile;
    use crate::presence::{BEACON_INSIDE_RANGE, BEACON_OUTSIDE_RANGE, DEVICE_BEACON_STATE_CHANGED};
    use crate::presence::Trigger;
    use async_trait::async_trait;

    const KEYS: &str = "AA:BB:CC:DD:EE:01";

    fn keys_identity() -> IdentityKey {
        IdentityKey::Peripheral {
            address: KEYS.into(),
        }
    }

    fn keys_adv(rssi: i16) -> RawAdvertisement {
        RawAdvertisement::new(KEYS, rssi).with_name("Keys")
    }

    fn config(inside: u32, outside: u32) -> ScanConfig {
        ScanConfig {
            verification_amount_inside: inside,
            verification_amount_outside: outside,
            scan_timeout_ms: 20,
            ..ScanConfig::default()
        }
    }

    struct FailingSource;

    #[async_trait]
    impl AdvertisementSource for FailingSource {
        async fn scan(&self, _duration: Duration) -> BluetoothResult<Vec<RawAdvertisement>> {
            Err(BluetoothError::DiscoveryFailed {
                message: "adapter went away".into(),
            })
        }
    }

    struct HangingSource;

    #[async_trait]
    impl AdvertisementSource for HangingSource {
        async fn scan(&self, _duration: Duration) -> BluetoothResult<Vec<RawAdvertisement>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![keys_adv(-50)])
        }
    }

    struct RejectingSink;

    impl EventSink for RejectingSink {
        fn emit(&self, trigger: &Trigger) -> Result<()> {
            Err(BeaconError::TriggerFailed {
                name: trigger.name.into(),
                message: "host unavailable".into(),
            })
        }
    }

    #[test]
    fn test_cold_start_reports_detect_without_transition() {
        let mut service = ScanService::new(&config(1, 3));
        service.track(keys_identity(), "Keys", None);

        let report = service.process(&[keys_adv(-60)]);
        assert!(report.transitions.is_empty());
        assert!(report.updates.contains(&CapabilityUpdate {
            device: keys_identity(),
            reading: Reading::Detect(true),
        }));
    }

    #[test]
    fn test_readings_only_when_changed() {
        let mut service = ScanService::new(&config(1, 3));
        service.track(keys_identity(), "Keys", Some(true));

        let first = service.process(&[keys_adv(-60)]);
        assert_eq!(
            first.updates,
            vec![CapabilityUpdate {
                device: keys_identity(),
                reading: Reading::SignalStrength(-60),
            }]
        );

        assert!(service.process(&[keys_adv(-60)]).updates.is_empty());

        let third = service.process(&[keys_adv(-70)]);
        assert_eq!(third.updates.len(), 1);
        assert_eq!(third.updates[0].reading, Reading::SignalStrength(-70));
    }

    #[test]
    fn test_readings_limited_to_stored_capabilities() {
        let mut service = ScanService::new(&config(1, 3));
        let mut adv = keys_adv(-60);
        adv.service_data.push(crate::types::ServiceData::new("180f", vec![80]));

        let device = PairedDevice {
            identity: keys_identity(),
            name: "Keys".into(),
            profile: DeviceProfile {
                capabilities: vec![Capability::Detect, Capability::MeasureBattery],
                energy: Some(EnergyProfile::default()),
                ..DeviceProfile::default()
            },
            detected: Some(true),
            paired_at: chrono::Utc::now(),
        };
        service.track_paired(&device);

        let report = service.process(&[adv]);
        assert_eq!(
            report.updates,
            vec![CapabilityUpdate {
                device: keys_identity(),
                reading: Reading::MeasureBattery(80),
            }]
        );
    }

    #[test]
    fn test_distance_reading_follows_rssi() {
        let mut data = vec![0x4C, 0x00, 0x02, 0x15];
        data.extend_from_slice(&[0x11; 16]);
        data.extend_from_slice(&[0x00, 0x01, 0x00, 0x02, 0xC5]);
        let adv = |rssi| {
            RawAdvertisement::new("11:22:33:44:55:66", rssi).with_manufacturer_data(data.clone())
        };
        let identity = FrameDecoder::default().decode(&adv(-59)).identity_key().unwrap();

        let mut service = ScanService::new(&config(1, 3));
        service.track(identity.clone(), "Tag", Some(true));

        let first = service.process(&[adv(-59)]);
        let readings: Vec<&Reading> = first.updates.iter().map(|update| &update.reading).collect();
        assert_eq!(
            readings,
            vec![&Reading::SignalStrength(-59), &Reading::HomeyDistance(0.19)]
        );
        assert!(first.updates.iter().all(|update| update.device == identity));

        assert!(service.process(&[adv(-59)]).updates.is_empty());

        let third = service.process(&[adv(-70)]);
        assert_eq!(third.updates.len(), 2);
        let Reading::HomeyDistance(distance) = third.updates[1].reading else {
            panic!("expected distance, got {:?}", third.updates[1].reading);
        };
        let expected = 0.19 * (70.0_f64 / 59.0).powi(8);
        assert!((distance - expected).abs() < 1e-9, "got {distance}");
    }

    #[test]
    fn test_sync_paired_tracks_and_drops_devices() {
        let paired = |n: u8| PairedDevice {
            identity: IdentityKey::Peripheral {
                address: format!("AA:BB:CC:DD:EE:{n:02X}"),
            },
            name: format!("Tag {n}"),
            profile: DeviceProfile::default(),
            detected: Some(false),
            paired_at: chrono::Utc::now(),
        };

        let mut service = ScanService::new(&config(1, 1));
        service.sync_paired(&[paired(1), paired(2)]);
        assert_eq!(service.tracker().len(), 2);
        service.process(&[keys_adv(-60)]);
        assert_eq!(
            service.tracker().state(&keys_identity()).unwrap().detected(),
            Some(true)
        );

        service.sync_paired(&[paired(1), paired(3)]);
        assert_eq!(service.tracker().len(), 2);
        assert!(!service.tracker().is_tracked(&paired(2).identity));
        assert!(service.tracker().is_tracked(&paired(3).identity));
        assert_eq!(
            service.tracker().state(&keys_identity()).unwrap().detected(),
            Some(true)
        );
    }

    #[tokio::test]
    async fn test_run_cycle_delivers_triggers() {
        let mut service = ScanService::new(&config(1, 1));
        service.track(keys_identity(), "Keys", Some(false));
        let source = ReplaySource::new(vec![vec![keys_adv(-60)], vec![]]);
        let sink = MemorySink::new();

        let report = service.run_cycle(&source, &sink).await;
        assert_eq!(report.transitions.len(), 1);
        assert_eq!(sink.triggers().len(), 4);
        assert_eq!(sink.names()[0], BEACON_INSIDE_RANGE);

        service.run_cycle(&source, &sink).await;
        let names = sink.names();
        assert_eq!(names.len(), 8);
        assert_eq!(names[4], BEACON_OUTSIDE_RANGE);
        assert_eq!(names[7], DEVICE_BEACON_STATE_CHANGED);
    }

    #[tokio::test]
    async fn test_scan_failure_is_empty_cycle() {
        let mut service = ScanService::new(&config(1, 1));
        service.track(keys_identity(), "Keys", Some(true));
        let sink = MemorySink::new();

        let report = service.run_cycle(&FailingSource, &sink).await;
        assert!(report.scan_failed);
        assert_eq!(report.advertisements, 0);
        assert_eq!(report.transitions.len(), 1);
        assert_eq!(sink.names()[0], BEACON_OUTSIDE_RANGE);
    }

    #[tokio::test]
    async fn test_scan_timeout_is_empty_cycle() {
        let mut service = ScanService::new(&config(1, 3));
        service.track(keys_identity(), "Keys", Some(true));
        let sink = MemorySink::new();

        let report = service.run_cycle(&HangingSource, &sink).await;
        assert!(report.scan_failed);
        assert!(report.beacons.is_empty());
        assert!(report.transitions.is_empty());
        assert_eq!(
            service.tracker().state(&keys_identity()).unwrap().change_counter(),
            1
        );
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_abort_cycle() {
        let mut service = ScanService::new(&config(1, 1));
        service.track(keys_identity(), "Keys", Some(false));
        let source = ReplaySource::new(vec![vec![keys_adv(-60)]]);

        let report = service.run_cycle(&source, &RejectingSink).await;
        assert_eq!(report.transitions.len(), 1);
        assert_eq!(
            service.tracker().state(&keys_identity()).unwrap().detected(),
            Some(true)
        );
    }

    #[tokio::test]
    async fn test_discover_excludes_paired() {
        let mut service = ScanService::new(&config(1, 3));
        let other = RawAdvertisement::new("AA:BB:CC:DD:EE:02", -70).with_name("Bag");
        let source = ReplaySource::new(vec![vec![keys_adv(-60), other]]);

        let paired: HashSet<IdentityKey> = [keys_identity()].into_iter().collect();
        let candidates = service.discover(&source, &paired).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name, "Bag");
    }

    #[tokio::test]
    async fn test_discover_nothing_found() {
        let mut service = ScanService::new(&config(1, 3));
        let source = ReplaySource::new(vec![vec![]]);
        let result = service.discover(&source, &HashSet::new()).await;
        assert!(matches!(result, Err(BeaconError::NoDevicesFound)));
    }

    #[tokio::test]
    async fn test_discover_does_not_advance_presence() {
        let mut service = ScanService::new(&config(1, 1));
        service.track(keys_identity(), "Keys", Some(false));
        let source = ReplaySource::new(vec![vec![keys_adv(-60)]]);

        service.discover(&source, &HashSet::new()).await.unwrap();
        assert_eq!(
            service.tracker().state(&keys_identity()).unwrap().detected(),
            Some(false)
        );
    }

    #[tokio::test]
    async fn test_discover_and_refresh() {
        let mut service = ScanService::new(&config(1, 3));
        let source = ReplaySource::new(vec![vec![keys_adv(-60)], vec![]]);

        let candidates = service.discover(&source, &HashSet::new()).await.unwrap();
        let mut stored = DeviceProfile::from_metadata(&candidates[0]);
        stored.capabilities.push(Capability::HomeyDistance);

        let delta = service.refresh_device(&keys_identity(), &stored).unwrap();
        assert!(delta.changed);
        assert_eq!(delta.capabilities_removed, vec![Capability::HomeyDistance]);

        let missing = service
            .discover_and_refresh(&source, &keys_identity(), &stored)
            .await;
        assert!(matches!(missing, Err(BeaconError::DeviceNotFound(_))));
    }

    #[test]
    fn test_apply_config_updates_thresholds() {
        let mut service = ScanService::new(&config(5, 5));
        service.track(keys_identity(), "Keys", Some(false));
        service.apply_config(&config(1, 1));

        let report = service.process(&[keys_adv(-60)]);
        assert_eq!(report.transitions.len(), 1);
    }

    #[test]
    fn test_untrack() {
        let mut service = ScanService::new(&config(1, 1));
        service.track(keys_identity(), "Keys", Some(true));
        assert!(service.untrack(&keys_identity()));
        assert!(service.process(&[]).transitions.is_empty());
    }
}
