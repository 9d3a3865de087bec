//! The `Walktrace` facade: one value a host application holds for the
//! lifetime of the app.
//!
//! It owns the store, the sync mirror, the geocoder and the recording service,
//! and exposes the operations the UI calls. Store work runs on the blocking
//! pool, so none of these calls stall the recording loop. Every successful
//! mutation is followed by a best-effort mirror push.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use log::{info, warn};

use crate::config::{GeocodeConfig, RemoteSettings, Settings};
use crate::error::{ConfigError, Result};
use crate::export::{ExportFile, ExportFormat, ImportSummary, create_export, import_file};
use crate::geocode::{GeocodeResult, Geocoder};
use crate::media::{THUMBNAIL_MAX_EDGE, create_thumbnail_data_url};
use crate::persistence::Store;
use crate::position::{HeadingSource, PositionSource};
use crate::recording::RecordingService;
use crate::sync::SyncMirror;
use crate::types::{Photo, Place, RouteBucket};

pub const DATABASE_FILE: &str = "walktrace.db";
pub const SETTINGS_FILE: &str = "settings.json";

pub struct Walktrace {
    store: Arc<Store>,
    mirror: Arc<SyncMirror>,
    geocoder: Arc<Geocoder>,
    recording: RecordingService,
    settings: RwLock<Settings>,
    settings_path: Option<PathBuf>,
}

impl Walktrace {
    /// Open the app data directory, taking remote and geocoding endpoints
    /// from the environment.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(data_dir, RemoteSettings::from_env(), GeocodeConfig::from_env())
    }

    /// Open the app data directory with explicit deployment configuration.
    ///
    /// Whether the mirror is enabled is decided here, once. Toggling
    /// `remoteSyncEnabled` later takes effect on the next open.
    pub fn open_with(
        data_dir: impl AsRef<Path>,
        remote: Option<RemoteSettings>,
        geocode: GeocodeConfig,
    ) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir).map_err(ConfigError::from)?;

        let settings_path = data_dir.join(SETTINGS_FILE);
        let settings = Settings::load(&settings_path)?;
        let store = Store::open(data_dir.join(DATABASE_FILE))?;
        let mirror = SyncMirror::from_settings(remote, settings.remote_sync_enabled);
        let geocoder = Geocoder::new(geocode)?;

        let mut app = Self::new(Arc::new(store), settings, mirror, geocoder);
        app.settings_path = Some(settings_path);
        info!(
            "[Walktrace] Opened {} (sync {})",
            data_dir.display(),
            if app.mirror.is_enabled() { "on" } else { "off" }
        );
        Ok(app)
    }

    /// Assemble from parts. Settings changes are kept in memory only.
    pub fn new(store: Arc<Store>, settings: Settings, mirror: SyncMirror, geocoder: Geocoder) -> Self {
        let mirror = Arc::new(mirror);
        let recording = RecordingService::new(
            store.clone(),
            mirror.clone(),
            settings.recorder_config(),
        );
        Self {
            store,
            mirror,
            geocoder: Arc::new(geocoder),
            recording,
            settings: RwLock::new(settings),
            settings_path: None,
        }
    }

    /// Run store work on the blocking pool.
    async fn with_store<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Store) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store)).await?
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn recording(&self) -> &RecordingService {
        &self.recording
    }

    // ========================================================================
    // Places
    // ========================================================================

    pub async fn places(&self) -> Result<Vec<Place>> {
        self.with_store(|store| Ok(store.get_all_places()?)).await
    }

    pub async fn place(&self, id: &str) -> Result<Option<Place>> {
        let id = id.to_string();
        self.with_store(move |store| Ok(store.get_place(&id)?)).await
    }

    /// Drop a marker at a position. The address is looked up first and
    /// falls back to a coordinate placeholder when offline.
    pub async fn add_place(&self, lat: f64, lng: f64, note: Option<String>) -> Result<Place> {
        let GeocodeResult { address, source } = self.geocoder.reverse_geocode(lat, lng).await;
        let mut place = Place::new(lat, lng, address);
        place.note = note;

        let stored = self.with_store(move |store| Ok(store.put_place(&place)?)).await?;
        info!("[Walktrace] Added place {} ({:?} address)", stored.id, source);
        self.mirror.push_place(&stored);
        Ok(stored)
    }

    pub async fn update_note(&self, place_id: &str, note: Option<String>) -> Result<Place> {
        let id = place_id.to_string();
        let updated = self
            .with_store(move |store| Ok(store.update_place(&id, |place| place.note = note)?))
            .await?;
        self.mirror.push_place(&updated);
        Ok(updated)
    }

    /// Attach a photo. The preview is generated before anything is written,
    /// so a bad image leaves the place unchanged.
    pub async fn attach_photo(&self, place_id: &str, bytes: Vec<u8>) -> Result<Place> {
        let (bytes, thumb) = tokio::task::spawn_blocking(move || {
            let thumb = create_thumbnail_data_url(&bytes, THUMBNAIL_MAX_EDGE);
            (bytes, thumb)
        })
        .await?;
        let thumb = thumb.inspect_err(|e| warn!("[Media] Preview failed: {}", e))?;

        let id = place_id.to_string();
        let updated = self
            .with_store(move |store| {
                Ok(store.update_place(&id, |place| {
                    place.photos.push(Photo::new(Some(bytes), Some(thumb)));
                })?)
            })
            .await?;
        self.mirror.push_place(&updated);
        Ok(updated)
    }

    pub async fn remove_photo(&self, place_id: &str, photo_id: &str) -> Result<Place> {
        let id = place_id.to_string();
        let photo_id = photo_id.to_string();
        let updated = self
            .with_store(move |store| {
                Ok(store.update_place(&id, |place| place.photos.retain(|p| p.id != photo_id))?)
            })
            .await?;
        self.mirror.push_place(&updated);
        Ok(updated)
    }

    /// Returns whether the place existed.
    pub async fn delete_place(&self, place_id: &str) -> Result<bool> {
        let id = place_id.to_string();
        let removed = self
            .with_store(move |store| Ok(store.delete_place(&id)?))
            .await?;
        if removed {
            self.mirror.delete_place(place_id);
        }
        Ok(removed)
    }

    pub async fn reverse_geocode(&self, lat: f64, lng: f64) -> GeocodeResult {
        self.geocoder.reverse_geocode(lat, lng).await
    }

    // ========================================================================
    // Routes
    // ========================================================================

    /// All day buckets, newest day first.
    pub async fn route_buckets(&self) -> Result<Vec<RouteBucket>> {
        self.with_store(|store| Ok(store.list_route_buckets()?)).await
    }

    pub async fn route_bucket(&self, day_key: &str) -> Result<Option<RouteBucket>> {
        let day = day_key.to_string();
        self.with_store(move |store| Ok(store.get_route_bucket(&day)?))
            .await
    }

    // ========================================================================
    // Tracking
    // ========================================================================

    /// Start recording with the current accuracy mode and thresholds.
    pub async fn start_tracking(&self, source: &dyn PositionSource) -> Result<()> {
        let settings = self.settings();
        self.recording
            .start(
                source,
                settings.position_request(),
                settings.recorder_config(),
            )
            .await?;
        Ok(())
    }

    pub async fn stop_tracking(&self) -> bool {
        self.recording.stop().await
    }

    pub async fn watch_heading(&self, source: &dyn HeadingSource) -> bool {
        self.recording.watch_heading(source).await
    }

    // ========================================================================
    // Export / import
    // ========================================================================

    /// Export places (all, or the selected ids) and every route bucket,
    /// using the export options from settings.
    pub async fn export(
        &self,
        format: ExportFormat,
        selected_ids: Option<Vec<String>>,
    ) -> Result<ExportFile> {
        let options = self.settings().export_options();
        self.with_store(move |store| {
            let snapshot = store.export_snapshot()?;
            Ok(create_export(
                snapshot,
                format,
                &options,
                selected_ids.as_deref(),
            )?)
        })
        .await
    }

    /// Replace local data with an export file. Nothing is written unless the
    /// whole file parses and its schema is supported.
    pub async fn import(&self, path: impl AsRef<Path>) -> Result<ImportSummary> {
        let path = path.as_ref().to_path_buf();
        self.with_store(move |store| Ok(import_file(store, &path)?))
            .await
    }

    /// Delete every place, route and bookkeeping record.
    pub async fn reset_all(&self) -> Result<()> {
        if self.recording.is_tracking().await {
            warn!("[Walktrace] Resetting while tracking; the next fix starts a new bucket");
        }
        self.with_store(|store| Ok(store.clear_all()?)).await?;
        self.geocoder.clear_cache();
        info!("[Walktrace] All data cleared");
        Ok(())
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub fn settings(&self) -> Settings {
        match self.settings.read() {
            Ok(settings) => settings.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Validate, persist (when opened from a data directory) and apply.
    /// New thresholds apply from the next tracking session.
    pub fn update_settings(&self, settings: Settings) -> Result<()> {
        settings.validate()?;
        if let Some(path) = &self.settings_path {
            settings.save(path)?;
        }
        let mut current = self
            .settings
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if current.remote_sync_enabled != settings.remote_sync_enabled {
            info!("[Settings] Sync toggle takes effect on next launch");
        }
        *current = settings;
        Ok(())
    }

    pub fn sync_enabled(&self) -> bool {
        self.mirror.is_enabled()
    }
}
