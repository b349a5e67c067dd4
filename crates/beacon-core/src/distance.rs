//! RSSI-based distance estimation.
//!
//! The estimate uses `ratio = rssi / calibrated_power`. Below a ratio of 1 the
//! beacon is closer than the reference distance and `ratio^10` is used. Beyond
//! that a path-loss curve applies. The far-field coefficients are empirical and
//! differ per frame type: iBeacon reports power at 1 m, Eddystone at 0 m. The
//! default [`DistanceModel::PerFrame`] picks the curve from the frame; a fixed
//! curve or a custom [`DistanceEstimator`] can replace it.

use serde::{Deserialize, Serialize};

use crate::types::BeaconKind;

/// Estimates a distance in metres from a received RSSI and calibrated power.
pub trait DistanceEstimator: Send + Sync {
    /// Returns `None` when no estimate can be made (e.g. zero calibrated power).
    fn estimate(&self, kind: &BeaconKind, rssi: i16, calibrated_power: i8) -> Option<f64>;
}

/// Built-in distance curves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceModel {
    /// [`Steep`](Self::Steep) for iBeacon, [`PathLoss`](Self::PathLoss) otherwise.
    #[default]
    PerFrame,

    /// `0.9 * ratio^7.7 + 0.111` in the far field.
    PathLoss,

    /// `0.19 * ratio^8` in the far field.
    Steep,
}

impl DistanceModel {
    /// The fixed curve used for `kind`.
    #[must_use]
    pub const fn for_kind(self, kind: &BeaconKind) -> Self {
        match (self, kind) {
            (Self::PerFrame, BeaconKind::IBeacon { .. }) => Self::Steep,
            (Self::PerFrame, _) => Self::PathLoss,
            (fixed, _) => fixed,
        }
    }

    /// Far-field part of the curve, for `ratio >= 1`.
    #[must_use]
    pub fn far_field(self, kind: &BeaconKind, ratio: f64) -> f64 {
        match self.for_kind(kind) {
            Self::Steep => 0.19 * ratio.powi(8),
            _ => ratio.powf(7.7).mul_add(0.9, 0.111),
        }
    }
}

impl DistanceEstimator for DistanceModel {
    fn estimate(&self, kind: &BeaconKind, rssi: i16, calibrated_power: i8) -> Option<f64> {
        if calibrated_power == 0 {
            return None;
        }
        let ratio = f64::from(rssi) / f64::from(calibrated_power);
        if ratio < 1.0 {
            Some(ratio.powi(10))
        } else {
            Some(self.far_field(kind, ratio))
        }
    }
}

impl<F> DistanceEstimator for F
where
    F: Fn(&BeaconKind, i16, i8) -> Option<f64> + Send + Sync,
{
    fn estimate(&self, kind: &BeaconKind, rssi: i16, calibrated_power: i8) -> Option<f64> {
        self(kind, rssi, calibrated_power)
    }
}
