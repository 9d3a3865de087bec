//! # Remote Sync Mirror
//!
//! Write-only, best-effort mirror of local changes to a remote HTTP store.
//!
//! The mirror is a capability value decided once at startup: [`SyncMirror::Disabled`]
//! when no remote is configured or the user turned sync off, in which case every
//! push is a no-op. When enabled, pushes are queued to a single background worker
//! that is started on first use. Queueing never blocks and never fails the caller;
//! a push that cannot be queued or delivered is logged and dropped. The next
//! mutation of the same record pushes its current state again.
//!
//! Endpoints, relative to the configured base URL:
//! - `PUT /places/{id}` with the place document
//! - `PUT /media/places/{id}/{photoId}.jpg` with the primary photo's bytes
//! - `DELETE /places/{id}`
//! - `PUT /routes/{day}` with the whole day bucket

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use once_cell::sync::OnceCell;
use reqwest::{Client, Method, Url};
use serde::Serialize;
use tokio::sync::mpsc;
use tracekit::RoutePoint;

use crate::config::RemoteSettings;
use crate::error::SyncError;
use crate::types::{Place, RouteBucket};

/// Pushes waiting for the worker. Beyond this, new pushes are dropped.
const QUEUE_CAPACITY: usize = 64;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

// ============================================================================
// Remote documents
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct RemotePlace {
    id: String,
    lat: f64,
    lng: f64,
    address: String,
    #[serde(rename = "createdAtISO")]
    created_at: DateTime<Utc>,
    note: Option<String>,
    /// Preview of the primary photo, for clients that only show one
    #[serde(rename = "thumbDataURL")]
    thumb_data_url: Option<String>,
    photos: Vec<RemotePhoto>,
    #[serde(rename = "updatedAtISO")]
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct RemotePhoto {
    id: String,
    #[serde(rename = "createdAtISO")]
    created_at: DateTime<Utc>,
    has_blob: bool,
    #[serde(rename = "thumbDataURL")]
    thumb_data_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct RemoteRoute {
    id: String,
    date: String,
    points: Vec<RoutePoint>,
}

impl RemotePlace {
    fn from_place(place: &Place) -> Self {
        Self {
            id: place.id.clone(),
            lat: place.lat,
            lng: place.lng,
            address: place.address.clone(),
            created_at: place.created_at,
            note: place.note.clone(),
            thumb_data_url: place.photos.first().and_then(|p| p.thumb_data_url.clone()),
            photos: place
                .photos
                .iter()
                .map(|photo| RemotePhoto {
                    id: photo.id.clone(),
                    created_at: photo.created_at,
                    has_blob: photo.blob.as_ref().is_some_and(|b| !b.is_empty()),
                    thumb_data_url: photo.thumb_data_url.clone(),
                })
                .collect(),
            updated_at: Utc::now(),
        }
    }
}

/// One unit of work for the worker.
#[derive(Debug)]
enum SyncOp {
    PutPlace {
        place: RemotePlace,
        /// `(photoId, bytes)` of the primary photo
        media: Option<(String, Vec<u8>)>,
    },
    DeletePlace(String),
    PutRoute(RemoteRoute),
}

impl SyncOp {
    fn label(&self) -> String {
        match self {
            SyncOp::PutPlace { place, .. } => format!("place {}", place.id),
            SyncOp::DeletePlace(id) => format!("delete {}", id),
            SyncOp::PutRoute(route) => format!("route {}", route.id),
        }
    }
}

// ============================================================================
// Mirror
// ============================================================================

/// Whether changes are mirrored, and where to.
pub enum SyncMirror {
    Disabled,
    Enabled(RemoteMirror),
}

impl SyncMirror {
    /// Enabled only when a remote is configured and the user opted in.
    pub fn from_settings(remote: Option<RemoteSettings>, enabled: bool) -> Self {
        match remote {
            Some(remote) if enabled => {
                info!("[Sync] Mirroring to {}", remote.base_url);
                SyncMirror::Enabled(RemoteMirror::new(remote))
            }
            Some(_) => {
                debug!("[Sync] Remote configured but sync disabled by user");
                SyncMirror::Disabled
            }
            None => SyncMirror::Disabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, SyncMirror::Enabled(_))
    }

    pub fn push_place(&self, place: &Place) {
        if let SyncMirror::Enabled(mirror) = self {
            let media = place.photos.first().and_then(|photo| {
                photo
                    .blob
                    .as_ref()
                    .filter(|b| !b.is_empty())
                    .map(|b| (photo.id.clone(), b.clone()))
            });
            mirror.enqueue(SyncOp::PutPlace {
                place: RemotePlace::from_place(place),
                media,
            });
        }
    }

    pub fn delete_place(&self, place_id: &str) {
        if let SyncMirror::Enabled(mirror) = self {
            mirror.enqueue(SyncOp::DeletePlace(place_id.to_string()));
        }
    }

    pub fn push_route_bucket(&self, bucket: &RouteBucket) {
        if let SyncMirror::Enabled(mirror) = self {
            mirror.enqueue(SyncOp::PutRoute(RemoteRoute {
                id: bucket.id.clone(),
                date: bucket.id.clone(),
                points: bucket.points.clone(),
            }));
        }
    }
}

/// The enabled mirror. The worker and its HTTP client are created on the
/// first push, on the runtime that push is made from.
pub struct RemoteMirror {
    settings: RemoteSettings,
    queue: OnceCell<mpsc::Sender<SyncOp>>,
}

impl RemoteMirror {
    pub fn new(settings: RemoteSettings) -> Self {
        Self {
            settings,
            queue: OnceCell::new(),
        }
    }

    fn enqueue(&self, op: SyncOp) {
        let label = op.label();
        let result = self
            .queue
            .get_or_try_init(|| spawn_worker(self.settings.clone()))
            .and_then(|queue| {
                queue.try_send(op).map_err(|e| match e {
                    mpsc::error::TrySendError::Full(_) => SyncError::QueueFull,
                    mpsc::error::TrySendError::Closed(_) => SyncError::Closed,
                })
            });
        if let Err(e) = result {
            warn!("[Sync] Dropped {}: {}", label, e);
        }
    }
}

fn spawn_worker(settings: RemoteSettings) -> Result<mpsc::Sender<SyncOp>, SyncError> {
    let handle = tokio::runtime::Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
    let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
    let base = Url::parse(&settings.base_url)
        .map_err(|e| SyncError::InvalidUrl(format!("{}: {}", settings.base_url, e)))?;
    let worker = SyncWorker {
        client,
        base,
        auth_header: settings.token.map(|t| format!("Bearer {}", t)),
    };

    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    handle.spawn(worker.run(rx));
    debug!("[Sync] Worker started");
    Ok(tx)
}

// ============================================================================
// Worker
// ============================================================================

struct SyncWorker {
    client: Client,
    base: Url,
    auth_header: Option<String>,
}

impl SyncWorker {
    /// Push in queue order, one at a time, so writes to a record stay ordered.
    async fn run(self, mut rx: mpsc::Receiver<SyncOp>) {
        while let Some(op) = rx.recv().await {
            let label = op.label();
            match self.push(op).await {
                Ok(()) => debug!("[Sync] Pushed {}", label),
                Err(e) => warn!("[Sync] Push of {} failed: {}", label, e),
            }
        }
        debug!("[Sync] Worker stopped");
    }

    async fn push(&self, op: SyncOp) -> Result<(), SyncError> {
        match op {
            SyncOp::PutPlace { place, media } => {
                let url = self.url(&["places", &place.id])?;
                self.send(self.request(Method::PUT, url).json(&place)).await?;
                if let Some((photo_id, bytes)) = media {
                    let file = format!("{}.jpg", photo_id);
                    let url = self.url(&["media", "places", &place.id, &file])?;
                    let request = self
                        .request(Method::PUT, url)
                        .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
                        .body(bytes);
                    self.send(request).await?;
                }
                Ok(())
            }
            SyncOp::DeletePlace(id) => {
                let url = self.url(&["places", &id])?;
                self.send(self.request(Method::DELETE, url)).await
            }
            SyncOp::PutRoute(route) => {
                let url = self.url(&["routes", &route.id])?;
                self.send(self.request(Method::PUT, url).json(&route)).await
            }
        }
    }

    fn url(&self, segments: &[&str]) -> Result<Url, SyncError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let request = self.client.request(method, url);
        match &self.auth_header {
            Some(auth) => request.header(reqwest::header::AUTHORIZATION, auth),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(), SyncError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SyncError::Status(status.as_u16()))
        }
    }
}
