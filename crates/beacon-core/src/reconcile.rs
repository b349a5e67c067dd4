//! Profile reconciliation.
//!
//! Compares freshly extracted [`PairingMetadata`] against what a collaborator has
//! stored for a paired device and reports the minimal set of changes. The
//! reconciler itself never mutates anything; [`DeviceProfile::apply`] is offered
//! for stores that want to fold a delta in.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::metadata::{EnergyProfile, PairingMetadata, Settings};
use crate::types::Capability;

/// Settings compared during reconciliation.
pub const RECONCILED_SETTINGS: &[&str] = &[
    crate::metadata::setting::ADDRESS,
    crate::metadata::setting::ADVERTISED_NAME,
    crate::metadata::setting::MODEL,
    crate::metadata::setting::MANUFACTURER,
];

/// Persisted profile of a paired device.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// Device settings.
    #[serde(default)]
    pub settings: Settings,

    /// Capabilities, in display order.
    #[serde(default)]
    pub capabilities: Vec<Capability>,

    /// Energy model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy: Option<EnergyProfile>,

    /// Calibrated power store value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibrated_power: Option<i8>,
}

impl DeviceProfile {
    /// Initial profile for a device being paired.
    #[must_use]
    pub fn from_metadata(metadata: &PairingMetadata) -> Self {
        Self {
            settings: metadata.settings.clone(),
            capabilities: metadata.capabilities.clone(),
            energy: metadata.energy.clone(),
            calibrated_power: metadata.calibrated_power,
        }
    }

    /// Fold a delta into this profile.
    pub fn apply(&mut self, delta: &ProfileDelta) {
        for (key, value) in &delta.settings {
            self.settings.insert(key.clone(), value.clone());
        }

        self.capabilities
            .retain(|capability| !delta.capabilities_removed.contains(capability));
        for capability in &delta.capabilities_added {
            if !self.capabilities.contains(capability) {
                self.capabilities.push(capability.clone());
            }
        }

        if delta.energy_changed {
            self.energy = delta.energy.clone().filter(|energy| !energy.is_empty());
        }
    }

    /// Whether the profile has a capability.
    #[must_use]
    pub fn has_capability(&self, capability: &Capability) -> bool {
        self.capabilities.contains(capability)
    }
}

/// Changes needed to bring a stored profile up to date.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProfileDelta {
    /// Whether anything differs.
    pub changed: bool,

    /// Changed setting keys and their new values.
    pub settings: BTreeMap<String, String>,

    /// Capabilities to add, in fresh order.
    pub capabilities_added: Vec<Capability>,

    /// Capabilities to remove, in stored order.
    pub capabilities_removed: Vec<Capability>,

    /// Whether the energy profile differs.
    pub energy_changed: bool,

    /// New energy profile, when it differs.
    pub energy: Option<EnergyProfile>,

    /// Stored capabilities the platform does not know. Left untouched.
    pub ignored_capabilities: Vec<Capability>,
}

impl ProfileDelta {
    /// Whether applying the delta is a no-op.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        !self.changed
    }
}

/// Diff fresh metadata against a stored profile.
#[must_use]
pub fn reconcile(fresh: &PairingMetadata, stored: &DeviceProfile) -> ProfileDelta {
    let settings: BTreeMap<String, String> = RECONCILED_SETTINGS
        .iter()
        .filter_map(|&key| {
            let value = fresh.settings.get(key)?;
            (stored.settings.get(key) != Some(value)).then(|| (key.to_string(), value.clone()))
        })
        .collect();

    let mut capabilities_added = Vec::new();
    for capability in &fresh.capabilities {
        if !stored.capabilities.contains(capability) && !capabilities_added.contains(capability) {
            capabilities_added.push(capability.clone());
        }
    }

    let mut capabilities_removed = Vec::new();
    let mut ignored_capabilities = Vec::new();
    for capability in &stored.capabilities {
        if fresh.capabilities.contains(capability) {
            continue;
        }
        let bucket = if capability.is_known() {
            &mut capabilities_removed
        } else {
            &mut ignored_capabilities
        };
        if !bucket.contains(capability) {
            bucket.push(capability.clone());
        }
    }

    let energy_changed = !energy_eq(fresh.energy.as_ref(), stored.energy.as_ref());
    let energy = if energy_changed {
        fresh.energy.clone()
    } else {
        None
    };

    let changed = !settings.is_empty()
        || !capabilities_added.is_empty()
        || !capabilities_removed.is_empty()
        || energy_changed;

    ProfileDelta {
        changed,
        settings,
        capabilities_added,
        capabilities_removed,
        energy_changed,
        energy,
        ignored_capabilities,
    }
}

fn energy_eq(a: Option<&EnergyProfile>, b: Option<&EnergyProfile>) -> bool {
    let empty = EnergyProfile::default();
    a.unwrap_or(&empty) == b.unwrap_or(&empty)
}
