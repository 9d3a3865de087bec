//! User settings and deployment configuration.
//!
//! [`Settings`] is what the settings screen edits and persists. The remote
//! mirror and geocoding endpoints are deployment concerns and come from the
//! environment instead.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracekit::{FilterTuning, RecorderConfig};

use crate::error::ConfigError;
use crate::export::ExportOptions;
use crate::position::PositionRequest;

pub const ENV_SYNC_URL: &str = "WALKTRACE_SYNC_URL";
pub const ENV_SYNC_TOKEN: &str = "WALKTRACE_SYNC_TOKEN";
pub const ENV_OPENCAGE_KEY: &str = "WALKTRACE_OPENCAGE_KEY";

/// Positioning hardware mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccuracyMode {
    #[default]
    Balanced,
    High,
}

// ============================================================================
// Settings
// ============================================================================

/// User-editable settings. Missing fields load as their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Default: balanced
    pub accuracy_mode: AccuracyMode,

    /// Minimum movement before storing a new route point.
    /// Default: 8.0 meters
    pub distance_threshold_meters: f64,

    /// Minimum elapsed time before storing a new route point.
    /// Default: 5000 ms
    pub time_threshold_ms: i64,

    /// Default: false
    pub include_original_on_export: bool,

    /// Default: true
    pub include_thumbnails_on_export: bool,

    /// Only honored when [`RemoteSettings`] are configured.
    /// Default: false
    pub remote_sync_enabled: bool,

    /// Noise filter and camera-follow constants. Not shown on the settings
    /// screen; edited by hand for devices with unusual GPS behavior.
    pub filter_tuning: FilterTuning,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            accuracy_mode: AccuracyMode::Balanced,
            distance_threshold_meters: 8.0,
            time_threshold_ms: 5000,
            include_original_on_export: false,
            include_thumbnails_on_export: true,
            remote_sync_enabled: false,
            filter_tuning: FilterTuning::default(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file. A missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("[Settings] No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&raw)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        self.validate()?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.recorder_config().validate()?;
        Ok(())
    }

    pub fn recorder_config(&self) -> RecorderConfig {
        RecorderConfig {
            min_distance_meters: self.distance_threshold_meters,
            min_interval_ms: self.time_threshold_ms,
            tuning: self.filter_tuning,
        }
    }

    pub fn export_options(&self) -> ExportOptions {
        ExportOptions {
            include_originals: self.include_original_on_export,
            include_thumbnails: self.include_thumbnails_on_export,
        }
    }

    pub fn position_request(&self) -> PositionRequest {
        PositionRequest {
            high_accuracy: self.accuracy_mode == AccuracyMode::High,
            ..PositionRequest::default()
        }
    }
}

// ============================================================================
// Remote mirror
// ============================================================================

/// Connection settings for the remote mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    /// Base URL without a trailing slash
    pub base_url: String,
    /// Bearer token, when the remote requires one
    pub token: Option<String>,
}

impl RemoteSettings {
    /// Read from `WALKTRACE_SYNC_URL` / `WALKTRACE_SYNC_TOKEN`.
    pub fn from_env() -> Option<Self> {
        Self::from_values(
            std::env::var(ENV_SYNC_URL).ok(),
            std::env::var(ENV_SYNC_TOKEN).ok(),
        )
    }

    /// Build from raw values. Blank or non-HTTP URLs mean "not configured".
    pub fn from_values(url: Option<String>, token: Option<String>) -> Option<Self> {
        let url = url?.trim().trim_end_matches('/').to_string();
        if url.is_empty() {
            return None;
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            log::warn!("[Settings] Ignoring sync URL without http(s) scheme: {}", url);
            return None;
        }
        Some(Self {
            base_url: url,
            token: token.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
        })
    }
}

// ============================================================================
// Geocoding
// ============================================================================

/// Reverse geocoding endpoints and limits.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeConfig {
    /// Primary provider key. No key, no primary lookups.
    pub opencage_key: Option<String>,
    pub opencage_url: String,
    pub nominatim_url: String,
    /// Sent to the fallback provider as its usage policy asks
    pub contact_email: String,
    pub language: String,

    /// Minimum spacing between fallback requests.
    /// Default: 1100 ms
    pub fallback_interval: Duration,

    /// Default: 10 s
    pub request_timeout: Duration,

    /// Default: 256 entries
    pub cache_size: usize,
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            opencage_key: None,
            opencage_url: "https://api.opencagedata.com/geocode/v1/json".to_string(),
            nominatim_url: "https://nominatim.openstreetmap.org/reverse".to_string(),
            contact_email: "walktrace-noreply@example.com".to_string(),
            language: "ja".to_string(),
            fallback_interval: Duration::from_millis(1100),
            request_timeout: Duration::from_secs(10),
            cache_size: 256,
        }
    }
}

impl GeocodeConfig {
    pub fn from_env() -> Self {
        Self {
            opencage_key: std::env::var(ENV_OPENCAGE_KEY)
                .ok()
                .filter(|k| !k.trim().is_empty()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.accuracy_mode, AccuracyMode::Balanced);
        assert_eq!(settings.distance_threshold_meters, 8.0);
        assert_eq!(settings.time_threshold_ms, 5000);
        assert!(!settings.include_original_on_export);
        assert!(settings.include_thumbnails_on_export);
        assert!(!settings.remote_sync_enabled);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"accuracyMode":"high","timeThresholdMs":2000}"#).unwrap();
        assert_eq!(settings.accuracy_mode, AccuracyMode::High);
        assert_eq!(settings.time_threshold_ms, 2000);
        assert_eq!(settings.distance_threshold_meters, 8.0);
        assert_eq!(settings.filter_tuning, FilterTuning::default());
        assert!(settings.position_request().high_accuracy);
    }

    #[test]
    fn test_filter_tuning_configurable() {
        let settings: Settings = serde_json::from_str(
            r#"{"filterTuning":{"coarseAccuracyMeters":25.0,"recenterDistanceMeters":200.0}}"#,
        )
        .unwrap();
        let tuning = settings.recorder_config().tuning;
        assert_eq!(tuning.coarse_accuracy_meters, 25.0);
        assert_eq!(tuning.recenter_distance_meters, 200.0);
        assert_eq!(tuning.jitter_factor, 0.8);
        assert_eq!(tuning.jitter_floor_meters, 3.0);

        let invalid = Settings {
            filter_tuning: FilterTuning {
                jitter_factor: -0.5,
                ..FilterTuning::default()
            },
            ..Settings::default()
        };
        assert!(matches!(invalid.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_missing_and_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        assert_eq!(Settings::load(&path).unwrap(), Settings::default());

        let settings = Settings {
            include_original_on_export: true,
            distance_threshold_meters: 12.5,
            ..Settings::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_validate_rejects_negative_threshold() {
        let settings = Settings {
            distance_threshold_meters: -1.0,
            ..Settings::default()
        };
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_position_request_timing() {
        let request = Settings::default().position_request();
        assert!(!request.high_accuracy);
        assert_eq!(request.timeout, Duration::from_secs(15));
        assert_eq!(request.maximum_age, Duration::ZERO);
    }

    #[test]
    fn test_remote_settings_from_values() {
        assert!(RemoteSettings::from_values(None, None).is_none());
        assert!(RemoteSettings::from_values(Some("  ".into()), None).is_none());
        assert!(RemoteSettings::from_values(Some("ftp://x".into()), None).is_none());

        let remote =
            RemoteSettings::from_values(Some("https://sync.example.com/".into()), Some("".into()))
                .unwrap();
        assert_eq!(remote.base_url, "https://sync.example.com");
        assert!(remote.token.is_none());
    }
}
