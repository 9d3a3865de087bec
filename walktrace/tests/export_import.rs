//! Export a populated store, import it into a fresh one, compare.

use std::io::{Cursor, Write};

use chrono::{DateTime, TimeZone, Utc};
use walktrace::export::{ExportOptions, ImportBundle, build_envelope, create_export, import_file};
use walktrace::{ErrorKind, ExportFormat, Photo, Place, RoutePoint, Store};
use zip::write::{SimpleFileOptions, ZipWriter};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

/// Two places (one with two photos, one bare) and a day of route with a gap.
fn populated_store() -> (Store, Vec<Place>) {
    let store = Store::in_memory().unwrap();

    let mut kyoto = Place::new(34.9858, 135.7588, "Kyoto Station");
    kyoto.note = Some("meet here".into());
    kyoto.photos = vec![
        Photo::new(
            Some(vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3]),
            Some("data:image/jpeg;base64,AAEC".into()),
        ),
        Photo::new(Some(vec![0xFF, 0xD8, 9, 9]), None),
    ];
    let nara = Place::new(34.6851, 135.8048, "Nara Park");

    let places = vec![
        store.put_place(&kyoto).unwrap(),
        store.put_place(&nara).unwrap(),
    ];

    for (i, gap) in [(0, true), (10, false), (20, false), (600, true), (610, false)] {
        let point = RoutePoint::new(35.0 + i as f64 * 0.00001, 135.0, at(i), gap);
        store.append_route_point("2024-05-01", &point).unwrap();
    }
    (store, places)
}

fn export_to_file(
    store: &Store,
    format: ExportFormat,
    options: ExportOptions,
    dir: &std::path::Path,
) -> std::path::PathBuf {
    let snapshot = store.export_snapshot().unwrap();
    let file = create_export(snapshot, format, &options, None).unwrap();
    file.write_to(dir).unwrap()
}

fn find<'a>(places: &'a [Place], id: &str) -> &'a Place {
    places.iter().find(|p| p.id == id).unwrap()
}

#[test]
fn test_json_round_trip_preserves_places_and_routes() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let (source, originals) = populated_store();
    let path = export_to_file(&source, ExportFormat::Json, ExportOptions::default(), dir.path());
    assert!(path.to_string_lossy().ends_with(".json"));

    let target = Store::in_memory().unwrap();
    let summary = import_file(&target, &path).unwrap();
    assert_eq!(summary.places, 2);
    assert_eq!(summary.photos, 2);
    assert_eq!(summary.routes, 1);

    let imported = target.get_all_places().unwrap();
    assert_eq!(imported.len(), originals.len());
    for original in &originals {
        let copy = find(&imported, &original.id);
        assert_eq!(copy.lat, original.lat);
        assert_eq!(copy.lng, original.lng);
        assert_eq!(copy.address, original.address);
        assert_eq!(copy.note, original.note);
        assert_eq!(copy.created_at, original.created_at);
        assert_eq!(copy.photos.len(), original.photos.len());
    }

    // JSON cannot carry originals: the previewed photo is rebuilt from its
    // preview, the other comes back as a placeholder
    let kyoto = find(&imported, &originals[0].id);
    assert_eq!(kyoto.photos[0].blob.as_deref(), Some(&[0u8, 1, 2][..]));
    assert!(!kyoto.photos[1].has_image());
    assert_eq!(summary.placeholders, 1);

    let bucket = target.get_route_bucket("2024-05-01").unwrap().unwrap();
    assert_eq!(bucket, source.get_route_bucket("2024-05-01").unwrap().unwrap());
    assert_eq!(bucket.segments().len(), 2);
}

#[test]
fn test_envelope_round_trip_in_both_original_modes() {
    let (source, originals) = populated_store();
    let snapshot = source.export_snapshot().unwrap();

    for include_originals in [false, true] {
        let options = ExportOptions {
            include_originals,
            include_thumbnails: true,
        };
        let json = serde_json::to_vec(&build_envelope(&snapshot, &options)).unwrap();
        let mut bundle = ImportBundle::from_bytes(json, ExportFormat::Json).unwrap();
        let places = bundle.to_places(None);

        assert_eq!(places.len(), originals.len());
        for original in &originals {
            let copy = find(&places, &original.id);
            assert_eq!((copy.lat, copy.lng), (original.lat, original.lng));
            assert_eq!(copy.note, original.note);
            assert_eq!(copy.photos.len(), original.photos.len());
        }
    }
}

#[test]
fn test_zip_round_trip_with_originals() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let (source, originals) = populated_store();
    let options = ExportOptions {
        include_originals: true,
        include_thumbnails: true,
    };
    let path = export_to_file(&source, ExportFormat::Zip, options, dir.path());

    let target = Store::in_memory().unwrap();
    let summary = import_file(&target, &path).unwrap();
    assert_eq!(summary.placeholders, 0);

    let imported = target.get_all_places().unwrap();
    let kyoto = find(&imported, &originals[0].id);
    for (copy, original) in kyoto.photos.iter().zip(&originals[0].photos) {
        assert_eq!(copy.id, original.id);
        assert_eq!(copy.blob, original.blob);
        assert_eq!(copy.thumb_data_url, original.thumb_data_url);
    }
}

#[test]
fn test_zip_without_media_keeps_photo_records() {
    let dir = tempfile::tempdir().unwrap();
    let (source, originals) = populated_store();
    let options = ExportOptions {
        include_originals: false,
        include_thumbnails: false,
    };
    let path = export_to_file(&source, ExportFormat::Zip, options, dir.path());

    let target = Store::in_memory().unwrap();
    let summary = import_file(&target, &path).unwrap();
    assert_eq!(summary.photos, 2);
    assert_eq!(summary.placeholders, 2);

    let kyoto = find(&target.get_all_places().unwrap(), &originals[0].id).clone();
    assert_eq!(kyoto.photos.len(), 2);
    assert!(kyoto.photos.iter().all(|p| !p.has_image()));
}

#[test]
fn test_originals_make_zip_larger() {
    let (source, _) = populated_store();
    let snapshot = source.export_snapshot().unwrap();
    let with = create_export(
        snapshot.clone(),
        ExportFormat::Zip,
        &ExportOptions {
            include_originals: true,
            include_thumbnails: true,
        },
        None,
    )
    .unwrap();
    let without = create_export(snapshot, ExportFormat::Zip, &ExportOptions::default(), None).unwrap();
    assert!(with.bytes.len() > without.bytes.len());
}

#[test]
fn test_newer_schema_rejected_before_any_write() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let (store, originals) = populated_store();

    let path = dir.path().join("future.json");
    std::fs::write(
        &path,
        r#"{"places":[],"routes":[],"exportedAtISO":"2030-01-01T00:00:00Z","schemaVersion":3}"#,
    )
    .unwrap();

    let err = walktrace::Error::from(import_file(&store, &path).unwrap_err());
    assert_eq!(err.kind(), ErrorKind::DataIntegrity);
    assert_eq!(store.get_all_places().unwrap().len(), originals.len());
    assert!(store.get_route_bucket("2024-05-01").unwrap().is_some());
}

#[test]
fn test_zip_without_manifest_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (store, originals) = populated_store();

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file("notes.txt", SimpleFileOptions::default()).unwrap();
    zip.write_all(b"hello").unwrap();
    let bytes = zip.finish().unwrap().into_inner();
    let path = dir.path().join("broken.zip");
    std::fs::write(&path, bytes).unwrap();

    let err = walktrace::Error::from(import_file(&store, &path).unwrap_err());
    assert_eq!(err.kind(), ErrorKind::DataIntegrity);
    assert_eq!(store.get_all_places().unwrap().len(), originals.len());
}

#[test]
fn test_single_photo_era_export_imports() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("old.json");
    std::fs::write(
        &path,
        r#"{
            "places": [{
                "id": "p1", "lat": 35.0, "lng": 135.0, "address": "Old place",
                "createdAtISO": "2023-04-01T10:00:00.000Z",
                "thumbDataURL": "data:image/jpeg;base64,AAEC"
            }],
            "routes": [{"date": "2023-04-01", "points": [
                {"lat": 35.0, "lng": 135.0, "tISO": "2023-04-01T10:00:00.000Z"}
            ]}]
        }"#,
    )
    .unwrap();

    let store = Store::in_memory().unwrap();
    let summary = import_file(&store, &path).unwrap();
    assert_eq!(summary.photos, 1);

    let place = store.get_place("p1").unwrap().unwrap();
    assert_eq!(place.photos.len(), 1);
    assert_eq!(place.photos[0].id, "p1-legacy");
    assert_eq!(place.photos[0].blob.as_deref(), Some(&[0u8, 1, 2][..]));

    let bucket = store.get_route_bucket("2023-04-01").unwrap().unwrap();
    assert_eq!(bucket.points.len(), 1);
    assert!(!bucket.points[0].gap_before);
}

#[test]
fn test_import_replaces_existing_contents() {
    let dir = tempfile::tempdir().unwrap();
    let (source, _) = populated_store();
    let path = export_to_file(&source, ExportFormat::Json, ExportOptions::default(), dir.path());

    let target = Store::in_memory().unwrap();
    let stale = target.put_place(&Place::new(1.0, 2.0, "stale")).unwrap();
    import_file(&target, &path).unwrap();

    assert!(target.get_place(&stale.id).unwrap().is_none());
    assert_eq!(target.get_all_places().unwrap().len(), 2);
}

#[test]
fn test_null_lists_and_address_import_as_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nulls.json");
    std::fs::write(
        &path,
        r#"{
            "places": [{
                "id": "p1", "lat": 35.0, "lng": 135.0, "address": null,
                "createdAtISO": "2023-04-01T10:00:00.000Z", "photos": null
            }],
            "routes": [{"id": "2023-04-01", "points": null}],
            "schemaVersion": 2
        }"#,
    )
    .unwrap();

    let store = Store::in_memory().unwrap();
    let summary = import_file(&store, &path).unwrap();
    assert_eq!(summary.places, 1);
    assert_eq!(summary.photos, 0);

    let place = store.get_place("p1").unwrap().unwrap();
    assert!(place.photos.is_empty());
    assert_eq!(place.address, walktrace::geocode::offline_address(35.0, 135.0));
}
