//! # Walktrace
//!
//! App core for a walk recorder: a place journal with photos and notes,
//! GPS routes bucketed by day, export/import, and an optional remote mirror.
//!
//! This library provides:
//! - SQLite persistence with schema migrations and legacy record upgrades ([`persistence`])
//! - JSON and zip export/import, including envelopes from older versions ([`export`])
//! - A best-effort, write-only remote mirror ([`sync`])
//! - Reverse geocoding with provider fallback and caching ([`geocode`])
//! - The async recording service that turns a position feed into stored routes ([`recording`])
//! - The [`Walktrace`] facade that wires these together for a host application
//!
//! Filtering and sampling decisions live in the [`tracekit`] crate.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use walktrace::{ExportFormat, PositionBridge, Walktrace};
//!
//! # async fn run() -> walktrace::Result<()> {
//! let app = Walktrace::open("/data/walktrace")?;
//!
//! let gps = PositionBridge::new();
//! app.start_tracking(&gps).await?;
//! // ... host pushes fixes into `gps` ...
//! app.stop_tracking().await;
//!
//! app.add_place(35.6812, 139.7671, Some("lunch".into())).await?;
//! let export = app.export(ExportFormat::Zip, None).await?;
//! export.write_to("/sdcard/Download")?;
//! # Ok(())
//! # }
//! ```

// Unified error handling
pub mod error;
pub use error::{Error, ErrorKind, Result};

// Settings and deployment configuration
pub mod config;
pub use config::{AccuracyMode, GeocodeConfig, RemoteSettings, Settings};

// Schema migrations
pub mod migrations;

// Places, photos, day buckets, snapshots
pub mod types;
pub use types::{Photo, PhotoDisplay, Place, RouteBucket, Snapshot};

// SQLite store
pub mod persistence;
pub use persistence::Store;

// Photo previews and data URLs
pub mod media;

// Export/import envelopes and archives
pub mod export;
pub use export::{ExportFile, ExportFormat, ExportOptions, ImportSummary};

// Reverse geocoding
pub mod geocode;
pub use geocode::{GeocodeResult, GeocodeSource, Geocoder};

// Remote mirror
pub mod sync;
pub use sync::SyncMirror;

// Position and heading sources
pub mod position;
pub use position::{
    HeadingBridge, HeadingSource, PositionBridge, PositionError, PositionEvent, PositionRequest,
    PositionSource,
};

// Recording loop
pub mod recording;
pub use recording::{RecorderEvent, RecordingService};

// Composition root
pub mod app;
pub use app::Walktrace;

pub use tracekit::{FilterTuning, Fix, GpsPoint, RecorderState, RoutePoint};

/// Route `log` output to logcat on Android. Elsewhere the host installs its
/// own logger and this does nothing.
#[cfg(target_os = "android")]
pub fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("walktrace"),
    );
}

#[cfg(not(target_os = "android"))]
pub fn init_logging() {
    // No-op on non-Android platforms
}
