//! # Export/Import Engine
//!
//! Serializes a [`Snapshot`] into a portable envelope, either as a single
//! JSON document or as a zip archive holding the same JSON plus original
//! photo bytes under `media/<placeId>/<photoId>.jpg`. Import is the reverse,
//! for both formats and for envelopes written by older versions.

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

use crate::error::ExportError;
use crate::types::Snapshot;

pub mod envelope;
mod import;

pub use envelope::{
    ExportEnvelope, ExportedBucket, ExportedPhoto, ExportedPlace, PlaceShape, build_envelope,
    media_path,
};
pub use import::{ImportBundle, ImportSummary, import_file, load_import_bundle};

/// Fixed name of the JSON entry inside a zip export.
pub const MANIFEST_NAME: &str = "walktrace.json";

const FILENAME_PREFIX: &str = "walktrace-export";

/// What to include per photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOptions {
    /// Attach full-resolution bytes (zip only; JSON cannot carry them).
    /// Default: false
    pub include_originals: bool,
    /// Attach cached previews.
    /// Default: true
    pub include_thumbnails: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_originals: false,
            include_thumbnails: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Zip,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Zip => "zip",
        }
    }

    /// Detect the format from a file extension. No extension reads as JSON.
    pub fn from_path(path: &Path) -> Result<Self, ExportError> {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("zip") => Ok(ExportFormat::Zip),
            Some("json") | None => Ok(ExportFormat::Json),
            Some(other) => Err(ExportError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// A finished export, ready to be saved or shared.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportFile {
    pub filename: String,
    pub format: ExportFormat,
    pub bytes: Vec<u8>,
}

impl ExportFile {
    /// Write into `dir` under the export's own filename.
    pub fn write_to(&self, dir: impl AsRef<Path>) -> Result<PathBuf, ExportError> {
        let path = dir.as_ref().join(&self.filename);
        std::fs::write(&path, &self.bytes)?;
        Ok(path)
    }
}

/// `walktrace-export-2024-05-01T09-00-00-000Z.json`
pub fn export_filename(format: ExportFormat, at: DateTime<Utc>) -> String {
    let stamp = at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("{}-{}.{}", FILENAME_PREFIX, stamp, format.extension())
}

/// Single-document export. Previews are inlined; original bytes are not.
pub fn create_json_export(
    snapshot: Snapshot,
    options: &ExportOptions,
    selected_ids: Option<&[String]>,
) -> Result<ExportFile, ExportError> {
    let snapshot = snapshot.select_places(selected_ids);
    let envelope = build_envelope(&snapshot, options);
    let bytes = serde_json::to_vec_pretty(&envelope)?;

    info!(
        "[Export] JSON export: {} places, {} bytes",
        envelope.places.len(),
        bytes.len()
    );
    Ok(ExportFile {
        filename: export_filename(ExportFormat::Json, Utc::now()),
        format: ExportFormat::Json,
        bytes,
    })
}

/// Archive export: the manifest plus every photo that received a path.
pub fn create_zip_export(
    snapshot: Snapshot,
    options: &ExportOptions,
    selected_ids: Option<&[String]>,
) -> Result<ExportFile, ExportError> {
    let snapshot = snapshot.select_places(selected_ids);
    let envelope = build_envelope(&snapshot, options);

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let manifest_options =
        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    // JPEG data doesn't deflate
    let media_options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    zip.start_file(MANIFEST_NAME, manifest_options)?;
    zip.write_all(&serde_json::to_vec_pretty(&envelope)?)?;

    let mut media_count = 0usize;
    for (place, exported) in snapshot.places.iter().zip(&envelope.places) {
        for (photo, exported_photo) in place.photos.iter().zip(&exported.photos) {
            let (Some(path), Some(blob)) = (&exported_photo.photo_path, &photo.blob) else {
                continue;
            };
            zip.start_file(path.as_str(), media_options)?;
            zip.write_all(blob)?;
            media_count += 1;
        }
    }

    let bytes = zip.finish()?.into_inner();
    info!(
        "[Export] Zip export: {} places, {} media files, {} bytes",
        envelope.places.len(),
        media_count,
        bytes.len()
    );
    Ok(ExportFile {
        filename: export_filename(ExportFormat::Zip, Utc::now()),
        format: ExportFormat::Zip,
        bytes,
    })
}

pub fn create_export(
    snapshot: Snapshot,
    format: ExportFormat,
    options: &ExportOptions,
    selected_ids: Option<&[String]>,
) -> Result<ExportFile, ExportError> {
    match format {
        ExportFormat::Json => create_json_export(snapshot, options, selected_ids),
        ExportFormat::Zip => create_zip_export(snapshot, options, selected_ids),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Photo, Place};
    use chrono::TimeZone;
    use std::io::Read;

    fn snapshot() -> Snapshot {
        let mut a = Place::new(35.0, 135.0, "a");
        a.photos = vec![Photo::new(Some(vec![0xFF, 0xD8, 0xFF, 0xE0]), None)];
        let b = Place::new(36.0, 136.0, "b");
        Snapshot {
            places: vec![a, b],
            routes: vec![],
            exported_at: Utc::now(),
            schema_version: 2,
        }
    }

    #[test]
    fn test_export_filename() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 15).unwrap();
        assert_eq!(
            export_filename(ExportFormat::Zip, at),
            "walktrace-export-2024-05-01T09-30-15-000Z.zip"
        );
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(
            ExportFormat::from_path(Path::new("backup.ZIP")).unwrap(),
            ExportFormat::Zip
        );
        assert_eq!(
            ExportFormat::from_path(Path::new("backup.json")).unwrap(),
            ExportFormat::Json
        );
        assert!(matches!(
            ExportFormat::from_path(Path::new("backup.gpx")),
            Err(ExportError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_zip_contains_manifest_and_media() {
        let snapshot = snapshot();
        let place = snapshot.places[0].clone();
        let options = ExportOptions {
            include_originals: true,
            include_thumbnails: true,
        };
        let file = create_zip_export(snapshot, &options, None).unwrap();
        assert!(file.filename.ends_with(".zip"));

        let mut archive = zip::ZipArchive::new(Cursor::new(file.bytes)).unwrap();
        assert_eq!(archive.len(), 2);
        assert!(archive.by_name(MANIFEST_NAME).is_ok());

        let mut media = archive
            .by_name(&media_path(&place.id, &place.photos[0].id))
            .unwrap();
        let mut bytes = Vec::new();
        media.read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes, vec![0xFF, 0xD8, 0xFF, 0xE0]);
    }

    #[test]
    fn test_zip_without_originals_has_only_manifest() {
        let file = create_zip_export(snapshot(), &ExportOptions::default(), None).unwrap();
        let archive = zip::ZipArchive::new(Cursor::new(file.bytes)).unwrap();
        assert_eq!(archive.len(), 1);
    }

    #[test]
    fn test_selection_filters_places() {
        let snapshot = snapshot();
        let selected = vec![snapshot.places[1].id.clone()];
        let file =
            create_json_export(snapshot, &ExportOptions::default(), Some(selected.as_slice()))
                .unwrap();
        let envelope: ExportEnvelope = serde_json::from_slice(&file.bytes).unwrap();
        assert_eq!(envelope.places.len(), 1);
        assert_eq!(envelope.places[0].address, "b");
    }

    #[test]
    fn test_empty_selection_result_is_valid() {
        let missing = vec!["nope".to_string()];
        let file =
            create_json_export(snapshot(), &ExportOptions::default(), Some(missing.as_slice()))
                .unwrap();
        let envelope: ExportEnvelope = serde_json::from_slice(&file.bytes).unwrap();
        assert!(envelope.places.is_empty());
    }
}
