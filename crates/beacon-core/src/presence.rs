//! Presence debouncing.
//!
//! A single BLE scan is lossy: a beacon in range may simply be missed. Each known
//! device therefore carries a [`PresenceState`] that only flips after a
//! configurable number of consecutive disagreeing cycles. The thresholds for
//! entering and leaving range are separate.
//!
//! ```text
//!            seen × threshold_in
//!   Absent ───────────────────────▶ Present
//!          ◀───────────────────────
//!           missed × threshold_out
//! ```
//!
//! Any agreeing cycle resets the counter, so alternating evidence never flips.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::types::{Beacon, IdentityKey};

/// Global trigger fired when a device enters range.
pub const BEACON_INSIDE_RANGE: &str = "beacon_inside_range";
/// Global trigger fired when a device leaves range.
pub const BEACON_OUTSIDE_RANGE: &str = "beacon_outside_range";
/// Device-scoped trigger fired when the device enters range.
pub const DEVICE_BEACON_INSIDE_RANGE: &str = "device_beacon_inside_range";
/// Device-scoped trigger fired when the device leaves range.
pub const DEVICE_BEACON_OUTSIDE_RANGE: &str = "device_beacon_outside_range";
/// Global trigger fired on every transition.
pub const BEACON_STATE_CHANGED: &str = "beacon_state_changed";
/// Device-scoped trigger fired on every transition.
pub const DEVICE_BEACON_STATE_CHANGED: &str = "device_beacon_state_changed";

/// Debounced presence of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    /// Not in range.
    Absent,
    /// In range.
    Present,
}

impl Presence {
    /// Presence matching a `detect` capability value.
    #[must_use]
    pub const fn from_detected(detected: bool) -> Self {
        if detected {
            Self::Present
        } else {
            Self::Absent
        }
    }

    /// The `detect` capability value.
    #[must_use]
    pub const fn is_present(self) -> bool {
        matches!(self, Self::Present)
    }
}

/// Confirmation counts required before a state flips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Consecutive sightings to flip Absent → Present.
    pub inside: u32,
    /// Consecutive misses to flip Present → Absent.
    pub outside: u32,
}

impl Thresholds {
    /// Create thresholds; zero is raised to one.
    #[must_use]
    pub fn new(inside: u32, outside: u32) -> Self {
        Self {
            inside: inside.max(1),
            outside: outside.max(1),
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::new(1, 3)
    }
}

/// Hysteresis state of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceState {
    detected: Option<bool>,
    change_counter: u32,
    thresholds: Thresholds,
}

impl PresenceState {
    /// State for a newly paired device with no capability value yet.
    #[must_use]
    pub const fn new(thresholds: Thresholds) -> Self {
        Self {
            detected: None,
            change_counter: 0,
            thresholds,
        }
    }

    /// State restored from a persisted `detect` capability value.
    #[must_use]
    pub const fn restored(thresholds: Thresholds, detected: Option<bool>) -> Self {
        Self {
            detected,
            change_counter: 0,
            thresholds,
        }
    }

    /// Current `detect` value; `None` before the first cycle.
    #[must_use]
    pub const fn detected(&self) -> Option<bool> {
        self.detected
    }

    /// Consecutive disagreeing cycles seen so far.
    #[must_use]
    pub const fn change_counter(&self) -> u32 {
        self.change_counter
    }

    /// Active thresholds.
    #[must_use]
    pub const fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Replace the thresholds. The pending counter is kept.
    pub fn set_thresholds(&mut self, thresholds: Thresholds) {
        self.thresholds = thresholds;
    }

    /// Feed one cycle of evidence. Returns the new presence if the state flipped.
    ///
    /// The first observation of a device sets the state directly and reports no
    /// flip.
    pub fn observe(&mut self, seen: bool) -> Option<Presence> {
        let Some(current) = self.detected else {
            self.detected = Some(seen);
            self.change_counter = 0;
            return None;
        };

        if current == seen {
            self.change_counter = 0;
            return None;
        }

        self.change_counter = self.change_counter.saturating_add(1);
        let threshold = if current {
            self.thresholds.outside
        } else {
            self.thresholds.inside
        };

        if self.change_counter >= threshold {
            self.detected = Some(seen);
            self.change_counter = 0;
            Some(Presence::from_detected(seen))
        } else {
            None
        }
    }
}

/// Where a trigger is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", content = "device", rename_all = "snake_case")]
pub enum TriggerScope {
    /// App-wide trigger.
    Global,
    /// Trigger bound to one device.
    Device(IdentityKey),
}

/// An automation trigger to be fired by the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trigger {
    /// Trigger identifier.
    pub name: &'static str,

    /// Delivery scope.
    #[serde(flatten)]
    pub scope: TriggerScope,

    /// Trigger tokens.
    pub tokens: serde_json::Value,
}

/// A confirmed presence change of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionEvent {
    /// Device identity.
    pub device: IdentityKey,

    /// Device display name.
    pub name: String,

    /// New presence.
    pub presence: Presence,

    /// When the transition was confirmed.
    pub at: DateTime<Utc>,
}

impl TransitionEvent {
    /// The triggers the host should fire for this transition.
    #[must_use]
    pub fn triggers(&self) -> Vec<Trigger> {
        let detected = self.presence.is_present();
        let (global, device) = if detected {
            (BEACON_INSIDE_RANGE, DEVICE_BEACON_INSIDE_RANGE)
        } else {
            (BEACON_OUTSIDE_RANGE, DEVICE_BEACON_OUTSIDE_RANGE)
        };
        let scoped = TriggerScope::Device(self.device.clone());

        vec![
            Trigger {
                name: global,
                scope: TriggerScope::Global,
                tokens: json!({ "device": self.name, "beacon": self.name }),
            },
            Trigger {
                name: device,
                scope: scoped.clone(),
                tokens: json!({ "beacon": self.name }),
            },
            Trigger {
                name: BEACON_STATE_CHANGED,
                scope: TriggerScope::Global,
                tokens: json!({ "device": self.name, "beacon": self.name, "detected": detected }),
            },
            Trigger {
                name: DEVICE_BEACON_STATE_CHANGED,
                scope: scoped,
                tokens: json!({ "beacon": self.name, "detected": detected }),
            },
        ]
    }
}

#[derive(Debug, Clone)]
struct TrackedDevice {
    name: String,
    state: PresenceState,
}

/// Presence state of every known device.
///
/// Single writer: updated once per scan cycle through `&mut self`.
#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    thresholds: Thresholds,
    devices: BTreeMap<IdentityKey, TrackedDevice>,
}

impl PresenceTracker {
    /// Create an empty tracker.
    #[must_use]
    pub const fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            devices: BTreeMap::new(),
        }
    }

    /// Apply new thresholds to every device.
    pub fn set_thresholds(&mut self, thresholds: Thresholds) {
        self.thresholds = thresholds;
        for device in self.devices.values_mut() {
            device.state.set_thresholds(thresholds);
        }
    }

    /// Active thresholds.
    #[must_use]
    pub const fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Start tracking a device, optionally restoring its last `detect` value.
    ///
    /// Re-tracking a known device only updates its name.
    pub fn track(&mut self, identity: IdentityKey, name: impl Into<String>, detected: Option<bool>) {
        let name = name.into();
        let thresholds = self.thresholds;
        self.devices
            .entry(identity)
            .and_modify(|device| device.name.clone_from(&name))
            .or_insert_with(|| TrackedDevice {
                name: name.clone(),
                state: PresenceState::restored(thresholds, detected),
            });
    }

    /// Stop tracking a device. Returns `true` if it was tracked.
    pub fn untrack(&mut self, identity: &IdentityKey) -> bool {
        self.devices.remove(identity).is_some()
    }

    /// Whether a device is tracked.
    #[must_use]
    pub fn is_tracked(&self, identity: &IdentityKey) -> bool {
        self.devices.contains_key(identity)
    }

    /// Number of tracked devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether no device is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// State of a tracked device.
    #[must_use]
    pub fn state(&self, identity: &IdentityKey) -> Option<&PresenceState> {
        self.devices.get(identity).map(|device| &device.state)
    }

    /// Identities of tracked devices.
    pub fn identities(&self) -> impl Iterator<Item = &IdentityKey> {
        self.devices.keys()
    }

    /// Feed one scan cycle of decoded beacons.
    pub fn update(&mut self, beacons: &[Beacon]) -> Vec<TransitionEvent> {
        let seen: HashSet<IdentityKey> = beacons.iter().filter_map(Beacon::identity_key).collect();
        self.update_seen(&seen)
    }

    /// Feed one scan cycle given the set of identities seen.
    pub fn update_seen(&mut self, seen: &HashSet<IdentityKey>) -> Vec<TransitionEvent> {
        let now = Utc::now();
        let mut events = Vec::new();

        for (identity, device) in &mut self.devices {
            let found = seen.contains(identity);
            let flipped = device.state.observe(found);

            debug!(
                device = %device.name,
                found,
                detected = ?device.state.detected(),
                counter = device.state.change_counter(),
                "Presence evidence"
            );

            if let Some(presence) = flipped {
                info!(device = %device.name, identity = %identity, ?presence, "Presence changed");
                events.push(TransitionEvent {
                    device: identity.clone(),
                    name: device.name.clone(),
                    presence,
                    at: now,
                });
            }
        }

        events
    }
}
