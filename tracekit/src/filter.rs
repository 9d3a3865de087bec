//! Jitter rejection for low-accuracy fixes.
//!
//! When the hardware reports a coarse uncertainty radius, small apparent
//! movements are indistinguishable from drift. Such fixes are discarded
//! entirely: they update neither the live position nor the stored track.

use serde::{Deserialize, Serialize};

use crate::error::{check_threshold, Result};
use crate::geo_utils::haversine_distance;
use crate::{Fix, GpsPoint};

/// Empirically tuned constants for fix admission and camera follow.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterTuning {
    /// Accuracy radius above which a fix is considered coarse.
    /// Default: 40.0 meters
    pub coarse_accuracy_meters: f64,

    /// A coarse fix must move more than `accuracy * jitter_factor` to count.
    /// Default: 0.8
    pub jitter_factor: f64,

    /// Lower bound on the jitter radius.
    /// Default: 3.0 meters
    pub jitter_floor_meters: f64,

    /// Viewport drift that triggers a recenter while following.
    /// Default: 500.0 meters
    pub recenter_distance_meters: f64,
}

impl Default for FilterTuning {
    fn default() -> Self {
        Self {
            coarse_accuracy_meters: 40.0,
            jitter_factor: 0.8,
            jitter_floor_meters: 3.0,
            recenter_distance_meters: 500.0,
        }
    }
}

impl FilterTuning {
    pub fn validate(&self) -> Result<()> {
        check_threshold("coarse_accuracy_meters", self.coarse_accuracy_meters)?;
        check_threshold("jitter_factor", self.jitter_factor)?;
        check_threshold("jitter_floor_meters", self.jitter_floor_meters)?;
        check_threshold("recenter_distance_meters", self.recenter_distance_meters)
    }

    /// Movement below this radius is treated as noise for a fix of the given accuracy.
    pub fn jitter_radius(&self, accuracy: f64) -> f64 {
        (accuracy * self.jitter_factor).max(self.jitter_floor_meters)
    }
}

/// Stateful noise admission filter.
///
/// Remembers the last *accepted* position (which need not be a stored one).
#[derive(Debug, Clone)]
pub struct NoiseFilter {
    tuning: FilterTuning,
    last_accepted: Option<GpsPoint>,
}

impl NoiseFilter {
    pub fn new(tuning: FilterTuning) -> Self {
        Self {
            tuning,
            last_accepted: None,
        }
    }

    /// Decide whether `fix` survives. Accepted fixes become the new reference.
    pub fn admit(&mut self, fix: &Fix) -> bool {
        if let (Some(previous), Some(accuracy)) = (self.last_accepted, fix.accuracy) {
            let movement = haversine_distance(&previous, &fix.point);
            if accuracy > self.tuning.coarse_accuracy_meters
                && movement < self.tuning.jitter_radius(accuracy)
            {
                log::debug!(
                    "[NoiseFilter] Rejected fix: accuracy {:.0}m, moved {:.1}m",
                    accuracy,
                    movement
                );
                return false;
            }
        }

        self.last_accepted = Some(fix.point);
        true
    }

    /// Forget the reference position so filtering restarts cleanly.
    pub fn reset(&mut self) {
        self.last_accepted = None;
    }

    pub fn last_accepted(&self) -> Option<GpsPoint> {
        self.last_accepted
    }

    pub fn tuning(&self) -> &FilterTuning {
        &self.tuning
    }
}
