//! # Track Recorder
//!
//! `Idle`/`Tracking` state machine that consumes fixes one at a time and decides:
//! 1. whether the fix is jitter (discarded outright),
//! 2. the new live position,
//! 3. whether the fix becomes a stored [`RoutePoint`], and whether that point
//!    opens a new polyline segment,
//! 4. whether a following viewport should recenter.
//!
//! The recorder never touches storage. Callers persist [`FixOutcome::stored`]
//! and must finish doing so before handing in the next fix.

use serde::{Deserialize, Serialize};

use crate::error::{check_threshold, Result};
use crate::filter::{FilterTuning, NoiseFilter};
use crate::geo_utils::{haversine_distance, should_store_point};
use crate::{Fix, GpsPoint, RoutePoint, TimedPoint};

/// Recorder lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderState {
    Idle,
    Tracking,
}

/// Configuration for storage admission.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderConfig {
    /// Minimum movement since the last stored point to store a new one.
    /// Default: 8.0 meters
    pub min_distance_meters: f64,

    /// Minimum elapsed time since the last stored point to store a new one.
    /// Default: 5000 ms
    pub min_interval_ms: i64,

    /// Noise filter and camera-follow constants.
    pub tuning: FilterTuning,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            min_distance_meters: 8.0,
            min_interval_ms: 5000,
            tuning: FilterTuning::default(),
        }
    }
}

impl RecorderConfig {
    pub fn validate(&self) -> Result<()> {
        check_threshold("min_distance_meters", self.min_distance_meters)?;
        check_threshold("min_interval_ms", self.min_interval_ms as f64)?;
        self.tuning.validate()
    }
}

/// What the recorder decided for one fix.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FixOutcome {
    /// The fix passed the noise filter and is now the live position
    pub admitted: bool,
    /// Point to append to today's bucket
    pub stored: Option<RoutePoint>,
    /// New viewport center, when following and the view drifted too far
    pub recenter: Option<GpsPoint>,
}

/// The recorder state machine.
#[derive(Debug, Clone)]
pub struct TrackRecorder {
    config: RecorderConfig,
    state: RecorderState,
    filter: NoiseFilter,

    /// Live position (last admitted fix)
    current: Option<Fix>,
    /// Memo for storage admission, per session
    last_stored: Option<TimedPoint>,
    /// Next stored point starts a new segment
    pending_gap: bool,

    follow: bool,
    viewport_center: Option<GpsPoint>,
    heading: Option<f64>,
}

impl TrackRecorder {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            filter: NoiseFilter::new(config.tuning),
            config,
            state: RecorderState::Idle,
            current: None,
            last_stored: None,
            pending_gap: true,
            follow: true,
            viewport_center: None,
            heading: None,
        }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// `Idle -> Tracking`. Returns false if already tracking.
    pub fn start(&mut self) -> bool {
        if self.state == RecorderState::Tracking {
            return false;
        }
        self.state = RecorderState::Tracking;
        self.begin_new_segment();
        self.follow = true;
        log::info!("[Recorder] Tracking started");
        true
    }

    /// `Tracking -> Idle`. Returns false if already idle.
    pub fn stop(&mut self) -> bool {
        if self.state == RecorderState::Idle {
            return false;
        }
        self.state = RecorderState::Idle;
        self.begin_new_segment();
        log::info!("[Recorder] Tracking stopped");
        true
    }

    /// Position permission was revoked or refused: drop back to `Idle`.
    pub fn permission_denied(&mut self) {
        if self.state == RecorderState::Tracking {
            log::warn!("[Recorder] Position permission denied, stopping");
        }
        self.state = RecorderState::Idle;
        self.begin_new_segment();
    }

    /// Swap in new thresholds. The noise filter restarts with the new tuning.
    pub fn reconfigure(&mut self, config: RecorderConfig) {
        self.config = config;
        self.filter = NoiseFilter::new(config.tuning);
    }

    fn begin_new_segment(&mut self) {
        self.pending_gap = true;
        self.last_stored = None;
        self.filter.reset();
    }

    // ========================================================================
    // Fix handling
    // ========================================================================

    /// Run one fix through the admission pipeline.
    pub fn handle_fix(&mut self, fix: Fix) -> FixOutcome {
        if self.state != RecorderState::Tracking {
            return FixOutcome::default();
        }
        if let Err(e) = fix.point.validate() {
            log::debug!("[Recorder] Ignoring fix: {}", e);
            return FixOutcome::default();
        }
        if !self.filter.admit(&fix) {
            return FixOutcome::default();
        }

        self.current = Some(fix);

        let previous = self.last_stored;
        let timed = TimedPoint::from(&fix);
        let stored = if should_store_point(
            previous.as_ref(),
            &timed,
            self.config.min_distance_meters,
            self.config.min_interval_ms,
        ) {
            let point = RoutePoint::new(
                fix.point.latitude,
                fix.point.longitude,
                fix.timestamp,
                self.pending_gap,
            );
            self.pending_gap = false;
            self.last_stored = Some(timed);
            Some(point)
        } else {
            None
        };

        let recenter = self.recenter_target(previous.is_none(), fix.point);
        if let Some(center) = recenter {
            self.viewport_center = Some(center);
        }

        FixOutcome {
            admitted: true,
            stored,
            recenter,
        }
    }

    /// Undo the bookkeeping for a point whose write did not complete, so the
    /// next admitted fix is retried and keeps the segment marker.
    pub fn write_failed(&mut self, point: &RoutePoint) {
        if point.gap_before {
            self.pending_gap = true;
        }
        self.last_stored = None;
    }

    fn recenter_target(&self, no_previous: bool, point: GpsPoint) -> Option<GpsPoint> {
        if !self.follow {
            return None;
        }
        let drifted = match self.viewport_center {
            Some(center) => {
                haversine_distance(&center, &point) > self.config.tuning.recenter_distance_meters
            }
            None => true,
        };
        (no_previous || drifted).then_some(point)
    }

    // ========================================================================
    // Presentation inputs
    // ========================================================================

    /// Enable or disable camera follow (the user panned away, or tapped "locate").
    pub fn set_follow(&mut self, follow: bool) {
        self.follow = follow;
    }

    /// Report where the viewport is currently centered.
    pub fn set_viewport_center(&mut self, center: GpsPoint) {
        self.viewport_center = Some(center);
    }

    /// Update the compass heading. `None` or a non-finite value hides the indicator.
    pub fn set_heading(&mut self, heading: Option<f64>) {
        self.heading = heading
            .filter(|h| h.is_finite())
            .map(|h| h.rem_euclid(360.0));
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn is_tracking(&self) -> bool {
        self.state == RecorderState::Tracking
    }

    pub fn current_position(&self) -> Option<&Fix> {
        self.current.as_ref()
    }

    pub fn heading(&self) -> Option<f64> {
        self.heading
    }

    pub fn is_following(&self) -> bool {
        self.follow
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at_ms(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_714_554_000_000 + ms).unwrap()
    }

    /// A walk heading north, ~11m per step, one fix per second.
    fn walk(step: usize) -> Fix {
        Fix::new(35.0 + step as f64 * 0.0001, 135.0, at_ms(step as i64 * 1000)).with_accuracy(5.0)
    }

    #[test]
    fn test_idle_ignores_fixes() {
        let mut recorder = TrackRecorder::new(RecorderConfig::default());
        let outcome = recorder.handle_fix(walk(0));
        assert_eq!(outcome, FixOutcome::default());
        assert!(recorder.current_position().is_none());
    }

    #[test]
    fn test_start_is_idempotent() {
        let mut recorder = TrackRecorder::new(RecorderConfig::default());
        assert!(recorder.start());
        assert!(!recorder.start());
        assert!(recorder.stop());
        assert!(!recorder.stop());
    }

    #[test]
    fn test_single_gap_per_session() {
        let mut recorder = TrackRecorder::new(RecorderConfig::default());
        recorder.start();

        let stored: Vec<RoutePoint> = (0..5)
            .filter_map(|i| recorder.handle_fix(walk(i)).stored)
            .collect();

        assert_eq!(stored.len(), 5);
        assert!(stored[0].gap_before);
        assert!(stored[1..].iter().all(|p| !p.gap_before));
    }

    #[test]
    fn test_stop_start_marks_gap_and_forgets_memo() {
        let mut recorder = TrackRecorder::new(RecorderConfig::default());
        recorder.start();
        recorder.handle_fix(walk(0));
        recorder.handle_fix(walk(1));
        recorder.stop();
        recorder.start();

        // Same spot as the last stored point: stored anyway because the
        // previous session's memo is gone.
        let resumed = recorder.handle_fix(walk(1)).stored.unwrap();
        assert!(resumed.gap_before);

        let next = recorder.handle_fix(walk(2)).stored.unwrap();
        assert!(!next.gap_before);
    }

    #[test]
    fn test_small_moves_not_stored_until_interval() {
        let mut recorder = TrackRecorder::new(RecorderConfig::default());
        recorder.start();
        assert!(recorder.handle_fix(walk(0)).stored.is_some());

        // ~1m moves every second: admitted for live display, not stored
        for i in 1..5 {
            let fix = Fix::new(35.0 + i as f64 * 0.00001, 135.0, at_ms(i * 1000)).with_accuracy(5.0);
            let outcome = recorder.handle_fix(fix);
            assert!(outcome.admitted);
            assert!(outcome.stored.is_none());
            assert_eq!(recorder.current_position(), Some(&fix));
        }

        // 5s after the last stored point
        let fix = Fix::new(35.00005, 135.0, at_ms(5000)).with_accuracy(5.0);
        assert!(recorder.handle_fix(fix).stored.is_some());
    }

    #[test]
    fn test_jitter_does_not_update_live_position() {
        let mut recorder = TrackRecorder::new(RecorderConfig::default());
        recorder.start();
        let first = walk(0);
        recorder.handle_fix(first);

        let jitter = Fix::new(35.00005, 135.0, at_ms(10_000)).with_accuracy(60.0);
        let outcome = recorder.handle_fix(jitter);
        assert!(!outcome.admitted);
        assert!(outcome.stored.is_none());
        assert_eq!(recorder.current_position(), Some(&first));
    }

    #[test]
    fn test_invalid_coordinates_ignored() {
        let mut recorder = TrackRecorder::new(RecorderConfig::default());
        recorder.start();
        let outcome = recorder.handle_fix(Fix::new(f64::NAN, 135.0, at_ms(0)));
        assert!(!outcome.admitted);
    }

    #[test]
    fn test_permission_denied_returns_to_idle() {
        let mut recorder = TrackRecorder::new(RecorderConfig::default());
        recorder.start();
        recorder.handle_fix(walk(0));
        recorder.permission_denied();
        assert_eq!(recorder.state(), RecorderState::Idle);

        recorder.start();
        assert!(recorder.handle_fix(walk(1)).stored.unwrap().gap_before);
    }

    #[test]
    fn test_reconfigure_changes_thresholds() {
        let mut recorder = TrackRecorder::new(RecorderConfig::default());
        recorder.reconfigure(RecorderConfig {
            min_distance_meters: 1000.0,
            min_interval_ms: 60_000,
            ..RecorderConfig::default()
        });
        recorder.start();
        assert!(recorder.handle_fix(walk(0)).stored.is_some());
        // ~11m and 1s later: below both raised thresholds
        assert!(recorder.handle_fix(walk(1)).stored.is_none());
        assert_eq!(recorder.config().min_interval_ms, 60_000);
    }

    #[test]
    fn test_write_failed_restores_gap() {
        let mut recorder = TrackRecorder::new(RecorderConfig::default());
        recorder.start();
        let point = recorder.handle_fix(walk(0)).stored.unwrap();
        recorder.write_failed(&point);

        let retried = recorder.handle_fix(walk(0)).stored.unwrap();
        assert!(retried.gap_before);
    }

    #[test]
    fn test_recenter_policy() {
        let mut recorder = TrackRecorder::new(RecorderConfig::default());
        recorder.start();

        // First fix of the session always recenters while following
        assert_eq!(recorder.handle_fix(walk(0)).recenter, Some(walk(0).point));

        // Small drift: no recenter
        assert!(recorder.handle_fix(walk(1)).recenter.is_none());

        // Jump ~1.1km north
        let far = Fix::new(35.01, 135.0, at_ms(60_000)).with_accuracy(5.0);
        assert_eq!(recorder.handle_fix(far).recenter, Some(far.point));

        // Not following: never recenter
        recorder.set_follow(false);
        let farther = Fix::new(35.05, 135.0, at_ms(120_000)).with_accuracy(5.0);
        assert!(recorder.handle_fix(farther).recenter.is_none());
    }

    #[test]
    fn test_heading_normalization() {
        let mut recorder = TrackRecorder::new(RecorderConfig::default());
        assert_eq!(recorder.heading(), None);
        recorder.set_heading(Some(370.0));
        assert!((recorder.heading().unwrap() - 10.0).abs() < 1e-9);
        recorder.set_heading(Some(-90.0));
        assert!((recorder.heading().unwrap() - 270.0).abs() < 1e-9);
        recorder.set_heading(Some(f64::NAN));
        assert_eq!(recorder.heading(), None);
        recorder.set_heading(None);
        assert_eq!(recorder.heading(), None);
    }

    #[test]
    fn test_config_validation() {
        assert!(RecorderConfig::default().validate().is_ok());
        let config = RecorderConfig {
            min_distance_meters: f64::INFINITY,
            ..RecorderConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
