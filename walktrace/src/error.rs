//! Error types for the walktrace core.
//!
//! Each subsystem has its own error enum. The top-level [`Error`] wraps them
//! and classifies every failure with [`Error::kind`], which is what callers
//! use to decide between a transient notification, a distinct data-integrity
//! report, or silence.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// How a failure should be treated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Surface as a transient notification; state was left unchanged
    Recoverable,
    /// The operation was rejected before any write; report distinctly
    DataIntegrity,
    /// Log only, never surface, never retry
    BestEffort,
    /// A broken invariant; committed data is still intact
    Internal,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Schema migration failed: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    #[error("Unsupported schema version {found} (this build supports up to {supported})")]
    UnsupportedSchema { found: u32, supported: u32 },

    #[error("Place not found: {0}")]
    NotFound(String),

    #[error("Point at {point} is earlier than the last point of {day} ({tail})")]
    NonChronological {
        day: String,
        point: DateTime<Utc>,
        tail: DateTime<Utc>,
    },

    #[error("Store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Unsupported schema version {found} (this build supports up to {supported})")]
    UnsupportedSchema { found: u32, supported: u32 },

    #[error("Archive has no manifest entry '{0}'")]
    MissingManifest(String),

    #[error("Unsupported import format: {0}")]
    UnsupportedFormat(String),

    #[error("Malformed envelope: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Media path escapes the archive: {0}")]
    UnsafeMediaPath(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("Empty image payload")]
    Empty,

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid setting: {0}")]
    Invalid(#[from] tracekit::TrackError),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote rejected push with status {0}")]
    Status(u16),

    #[error("Sync queue is full")]
    QueueFull,

    #[error("Sync worker has shut down")]
    Closed,

    #[error("No async runtime to run the sync worker on")]
    NoRuntime,

    #[error("Invalid remote URL: {0}")]
    InvalidUrl(String),
}

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned status {0}")]
    Status(u16),

    #[error("Provider returned no address")]
    NoResult,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrackingError {
    #[error("Position permission denied")]
    PermissionDenied,

    #[error("Position request timed out")]
    Timeout,

    #[error("Position unavailable: {0}")]
    Unavailable(String),

    #[error("Tracking is already running")]
    AlreadyTracking,
}

/// Any failure the core can report.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Thumbnail(#[from] ThumbnailError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Geocode(#[from] GeocodeError),

    #[error(transparent)]
    Tracking(#[from] TrackingError),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Task(e.to_string())
    }
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::UnsupportedSchema { .. } => ErrorKind::DataIntegrity,
            StoreError::NotFound(_) => ErrorKind::Recoverable,
            _ => ErrorKind::Internal,
        }
    }
}

impl ExportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExportError::UnsupportedSchema { .. } | ExportError::MissingManifest(_) => {
                ErrorKind::DataIntegrity
            }
            ExportError::Store(e) => e.kind(),
            _ => ErrorKind::Recoverable,
        }
    }
}

impl Error {
    /// Classify this failure for the caller.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Store(e) => e.kind(),
            Error::Export(e) => e.kind(),
            Error::Thumbnail(_) | Error::Config(_) | Error::Geocode(_) | Error::Tracking(_) => {
                ErrorKind::Recoverable
            }
            Error::Sync(_) => ErrorKind::BestEffort,
            Error::Task(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
