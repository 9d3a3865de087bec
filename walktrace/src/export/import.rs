//! Loading envelopes back into store-ready records.

use std::io::{Cursor, Read};
use std::path::Path;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use zip::ZipArchive;
use zip::result::ZipError;

use super::envelope::{ExportEnvelope, ExportedPhoto};
use super::{ExportFormat, MANIFEST_NAME};
use crate::error::ExportError;
use crate::media::decode_data_url;
use crate::migrations::SCHEMA_VERSION;
use crate::persistence::Store;
use crate::types::{Photo, Place, Snapshot, new_id};

/// A parsed, version-checked envelope, plus the archive its media lives in.
pub struct ImportBundle {
    pub envelope: ExportEnvelope,
    archive: Option<ZipArchive<Cursor<Vec<u8>>>>,
}

/// What an import wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub places: usize,
    pub photos: usize,
    /// Photos that came back with neither bytes nor preview
    pub placeholders: usize,
    pub routes: usize,
}

/// Read an export file, detecting the format from its extension.
pub fn load_import_bundle(path: impl AsRef<Path>) -> Result<ImportBundle, ExportError> {
    let path = path.as_ref();
    let format = ExportFormat::from_path(path)?;
    let bytes = std::fs::read(path)?;
    ImportBundle::from_bytes(bytes, format)
}

impl ImportBundle {
    /// Parse an envelope. Fails before anything else happens if the envelope
    /// comes from a newer schema than this build understands.
    pub fn from_bytes(bytes: Vec<u8>, format: ExportFormat) -> Result<Self, ExportError> {
        let bundle = match format {
            ExportFormat::Json => Self {
                envelope: serde_json::from_slice(&bytes)?,
                archive: None,
            },
            ExportFormat::Zip => {
                let mut archive = ZipArchive::new(Cursor::new(bytes))?;
                let manifest = {
                    let mut entry = archive.by_name(MANIFEST_NAME).map_err(|e| match e {
                        ZipError::FileNotFound => {
                            ExportError::MissingManifest(MANIFEST_NAME.to_string())
                        }
                        other => ExportError::Zip(other),
                    })?;
                    let mut raw = Vec::new();
                    entry.read_to_end(&mut raw)?;
                    raw
                };
                Self {
                    envelope: serde_json::from_slice(&manifest)?,
                    archive: Some(archive),
                }
            }
        };

        if bundle.envelope.schema_version > SCHEMA_VERSION {
            return Err(ExportError::UnsupportedSchema {
                found: bundle.envelope.schema_version,
                supported: SCHEMA_VERSION,
            });
        }
        debug!(
            "[Import] Loaded {:?} envelope v{}: {} places, {} buckets",
            format,
            bundle.envelope.schema_version,
            bundle.envelope.places.len(),
            bundle.envelope.routes.len()
        );
        Ok(bundle)
    }

    /// Convert the envelope's places into current-shape records.
    ///
    /// `filter_ids` restricts the result; `None` or an empty list keeps all.
    /// Per photo, bytes come from the archive path when it resolves, else
    /// from a decodable preview, else the photo is left as a placeholder.
    pub fn to_places(&mut self, filter_ids: Option<&[String]>) -> Vec<Place> {
        let filter = filter_ids.filter(|ids| !ids.is_empty());
        let exported: Vec<_> = self
            .envelope
            .places
            .iter()
            .filter(|p| filter.is_none_or(|ids| ids.contains(&p.id)))
            .cloned()
            .collect();

        exported
            .into_iter()
            .map(|mut exported| {
                if exported.id.trim().is_empty() {
                    exported.id = new_id();
                }
                let created_at = exported.created_at.unwrap_or_else(Utc::now);
                let photos = exported
                    .photo_entries()
                    .into_iter()
                    .map(|photo| self.resolve_photo(photo, created_at))
                    .collect();

                let mut place = Place {
                    id: exported.id,
                    lat: exported.lat,
                    lng: exported.lng,
                    address: exported.address,
                    created_at,
                    note: exported.note,
                    photos,
                };
                place.apply_identity_defaults();
                place
            })
            .collect()
    }

    /// Everything in the bundle as a store snapshot.
    pub fn into_snapshot(mut self) -> Snapshot {
        let places = self.to_places(None);
        Snapshot {
            places,
            routes: self
                .envelope
                .routes
                .into_iter()
                .map(|bucket| bucket.into_bucket())
                .filter(|bucket| !bucket.id.is_empty())
                .collect(),
            exported_at: self.envelope.exported_at,
            schema_version: self.envelope.schema_version,
        }
    }

    fn resolve_photo(&mut self, photo: ExportedPhoto, place_created_at: DateTime<Utc>) -> Photo {
        let from_archive = photo
            .photo_path
            .as_deref()
            .and_then(|path| self.read_media(path));
        let blob = from_archive.or_else(|| photo.thumb_data_url.as_deref().and_then(decode_data_url));

        Photo {
            id: photo.id,
            created_at: photo.created_at.unwrap_or(place_created_at),
            blob,
            thumb_data_url: photo.thumb_data_url.filter(|t| !t.is_empty()),
        }
    }

    /// Read a media entry. Any failure leaves the photo to the next source.
    fn read_media(&mut self, path: &str) -> Option<Vec<u8>> {
        let archive = self.archive.as_mut()?;
        if let Err(e) = check_media_path(path) {
            warn!("[Import] {}", e);
            return None;
        }

        let mut entry = match archive.by_name(path) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => {
                debug!("[Import] Media {} not in archive", path);
                return None;
            }
            Err(e) => {
                warn!("[Import] Could not open media {}: {}", path, e);
                return None;
            }
        };
        let mut bytes = Vec::new();
        match entry.read_to_end(&mut bytes) {
            Ok(_) => Some(bytes),
            Err(e) => {
                warn!("[Import] Could not read media {}: {}", path, e);
                None
            }
        }
    }
}

/// Reject archive paths that could point outside the archive root.
fn check_media_path(path: &str) -> Result<(), ExportError> {
    let unsafe_path = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path.split('/').any(|part| part == "..");
    if unsafe_path {
        Err(ExportError::UnsafeMediaPath(path.to_string()))
    } else {
        Ok(())
    }
}

/// Load an export file and replace the store's contents with it.
///
/// Parsing and the version check finish before the store is touched; the
/// replace itself is a single transaction.
pub fn import_file(store: &Store, path: impl AsRef<Path>) -> Result<ImportSummary, ExportError> {
    let snapshot = load_import_bundle(path)?.into_snapshot();
    let photos = snapshot.places.iter().map(|p| p.photos.len()).sum();
    let placeholders = snapshot
        .places
        .iter()
        .flat_map(|p| &p.photos)
        .filter(|photo| !photo.has_image())
        .count();

    store.import_snapshot(&snapshot)?;

    let summary = ImportSummary {
        places: snapshot.places.len(),
        photos,
        placeholders,
        routes: snapshot.routes.len(),
    };
    info!("[Import] Imported {:?}", summary);
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{ExportOptions, create_json_export, create_zip_export};
    use std::io::Write;
    use zip::write::{SimpleFileOptions, ZipWriter};

    fn zip_with(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, bytes) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(bytes).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    fn snapshot_with_photo() -> Snapshot {
        let mut place = Place::new(35.0, 135.0, "Nara");
        place.note = Some("deer".into());
        place.photos = vec![Photo::new(
            Some(vec![7; 64]),
            Some("data:image/jpeg;base64,AQID".into()),
        )];
        Snapshot {
            places: vec![place],
            routes: vec![],
            exported_at: Utc::now(),
            schema_version: SCHEMA_VERSION,
        }
    }

    #[test]
    fn test_zip_missing_manifest() {
        let bytes = zip_with(&[("other.json", &b"{}"[..])]);
        assert!(matches!(
            ImportBundle::from_bytes(bytes, ExportFormat::Zip),
            Err(ExportError::MissingManifest(_))
        ));
    }

    #[test]
    fn test_newer_schema_rejected_at_load() {
        let json = br#"{"places":[],"routes":[],"exportedAtISO":"2030-01-01T00:00:00Z","schemaVersion":99}"#;
        assert!(matches!(
            ImportBundle::from_bytes(json.to_vec(), ExportFormat::Json),
            Err(ExportError::UnsupportedSchema { found: 99, .. })
        ));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            ImportBundle::from_bytes(b"{not json".to_vec(), ExportFormat::Json),
            Err(ExportError::Parse(_))
        ));
    }

    #[test]
    fn test_json_recovers_bytes_from_preview() {
        let file = create_json_export(snapshot_with_photo(), &ExportOptions::default(), None)
            .unwrap();
        let mut bundle = ImportBundle::from_bytes(file.bytes, ExportFormat::Json).unwrap();
        let places = bundle.to_places(None);
        assert_eq!(places[0].photos[0].blob.as_deref(), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn test_zip_prefers_archive_bytes() {
        let options = ExportOptions {
            include_originals: true,
            include_thumbnails: true,
        };
        let file = create_zip_export(snapshot_with_photo(), &options, None).unwrap();
        let mut bundle = ImportBundle::from_bytes(file.bytes, ExportFormat::Zip).unwrap();
        let places = bundle.to_places(None);
        assert_eq!(places[0].photos[0].blob.as_ref().map(Vec::len), Some(64));
    }

    #[test]
    fn test_placeholder_when_nothing_resolves() {
        let options = ExportOptions {
            include_originals: false,
            include_thumbnails: false,
        };
        let file = create_json_export(snapshot_with_photo(), &options, None).unwrap();
        let mut bundle = ImportBundle::from_bytes(file.bytes, ExportFormat::Json).unwrap();
        let photo = &bundle.to_places(None)[0].photos[0];
        assert!(photo.blob.is_none());
        assert!(!photo.has_image());
    }

    #[test]
    fn test_unsafe_media_path_not_read() {
        let manifest = br#"{"schemaVersion":2,"places":[{"id":"p","lat":1.0,"lng":2.0,
            "photos":[{"id":"x","photoPath":"../escape.jpg"}]}]}"#;
        let bytes = zip_with(&[(MANIFEST_NAME, &manifest[..])]);
        let mut bundle = ImportBundle::from_bytes(bytes, ExportFormat::Zip).unwrap();
        let places = bundle.to_places(None);
        assert!(places[0].photos[0].blob.is_none());
        assert!(check_media_path("media/p/x.jpg").is_ok());
        assert!(check_media_path("/etc/passwd").is_err());
    }

    #[test]
    fn test_filter_ids() {
        let json = br#"{"schemaVersion":2,"places":[
            {"id":"a","lat":1.0,"lng":2.0,"address":"A"},
            {"id":"b","lat":3.0,"lng":4.0,"address":"B"}]}"#;
        let mut bundle = ImportBundle::from_bytes(json.to_vec(), ExportFormat::Json).unwrap();
        let only_b = vec!["b".to_string()];
        let places = bundle.to_places(Some(only_b.as_slice()));
        assert_eq!(places.len(), 1);
        assert_eq!(places[0].id, "b");
        assert_eq!(bundle.to_places(None).len(), 2);
    }

    #[test]
    fn test_identity_defaults_for_partial_records() {
        let json = br#"{"places":[{"lat":35.5,"lng":139.5,"photos":[{},{}]}]}"#;
        let mut bundle = ImportBundle::from_bytes(json.to_vec(), ExportFormat::Json).unwrap();
        let place = &bundle.to_places(None)[0];
        assert!(!place.id.is_empty());
        assert!(place.address.contains("35.50000"));
        assert_eq!(place.photos.len(), 2);
        assert_ne!(place.photos[0].id, place.photos[1].id);
    }
}
