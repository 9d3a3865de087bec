//! Recording service: drives a [`TrackRecorder`] from a position subscription.
//!
//! One session runs at a time. Its loop takes readings off the subscription
//! and handles each fix to completion (filtering, then the store append)
//! before taking the next one. Stopping signals the loop and waits for it,
//! so an in-flight fix is still recorded. Everything the UI needs to redraw
//! is published as a [`RecorderEvent`].

use std::sync::{Arc, Mutex as StdMutex};

use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::{Mutex, broadcast, oneshot};
use tokio::task::JoinHandle;
use tracekit::{Fix, GpsPoint, RecorderConfig, RecorderState, RoutePoint, TrackRecorder};

use crate::error::{StoreError, TrackingError};
use crate::persistence::Store;
use crate::position::{
    HeadingSource, PositionError, PositionEvent, PositionRequest, PositionSource,
    PositionSubscription,
};
use crate::sync::SyncMirror;

const EVENT_CAPACITY: usize = 256;

/// What changed, for whoever is drawing the map.
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEvent {
    /// New live position
    PositionUpdated(Fix),
    /// A point was durably appended to a day bucket
    PointStored { day: String, point: RoutePoint },
    /// Move the viewport here
    Recenter(GpsPoint),
    /// `None` hides the heading indicator
    HeadingChanged(Option<f64>),
    /// The session ended because permission was refused or revoked
    PermissionDenied,
    /// A point could not be written; it will be retried with the next fix
    StoreFailed(String),
    Stopped,
}

struct Shared {
    store: Arc<Store>,
    mirror: Arc<SyncMirror>,
    recorder: Mutex<TrackRecorder>,
    events: broadcast::Sender<RecorderEvent>,
}

struct Session {
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct RecordingService {
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
    heading_task: StdMutex<Option<JoinHandle<()>>>,
}

impl RecordingService {
    pub fn new(store: Arc<Store>, mirror: Arc<SyncMirror>, config: RecorderConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                store,
                mirror,
                recorder: Mutex::new(TrackRecorder::new(config)),
                events,
            }),
            session: Mutex::new(None),
            heading_task: StdMutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.shared.events.subscribe()
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Start a session with fresh thresholds. Fails if one is already running.
    pub async fn start(
        &self,
        source: &dyn PositionSource,
        request: PositionRequest,
        config: RecorderConfig,
    ) -> Result<(), TrackingError> {
        let mut session = self.session.lock().await;
        if self.shared.recorder.lock().await.is_tracking() {
            return Err(TrackingError::AlreadyTracking);
        }
        // A session that ended on its own (permission, source gone) may still be winding down
        if let Some(previous) = session.take() {
            let _ = previous.cancel.send(());
            let _ = previous.task.await;
        }

        {
            let mut recorder = self.shared.recorder.lock().await;
            recorder.reconfigure(config);
            recorder.start();
        }

        let subscription = source.subscribe(request);
        let (cancel, cancelled) = oneshot::channel();
        let task = tokio::spawn(run_session(self.shared.clone(), subscription, cancelled));
        *session = Some(Session { cancel, task });
        Ok(())
    }

    /// Stop the running session, letting an in-flight fix finish first.
    /// Returns false if nothing was running.
    pub async fn stop(&self) -> bool {
        let session = self.session.lock().await.take();
        if let Some(Session { cancel, task }) = session {
            let _ = cancel.send(());
            if let Err(e) = task.await {
                error!("[Recorder] Session task failed: {}", e);
            }
        }

        let stopped = self.shared.recorder.lock().await.stop();
        if stopped {
            self.shared.emit(RecorderEvent::Stopped);
        }
        stopped
    }

    // ========================================================================
    // Heading
    // ========================================================================

    /// Follow a heading source, replacing any previous one. Returns false
    /// when the device has no compass; the indicator is hidden in that case.
    pub async fn watch_heading(&self, source: &dyn HeadingSource) -> bool {
        let previous = self.heading_task.lock().ok().and_then(|mut task| task.take());
        if let Some(previous) = previous {
            previous.abort();
        }

        let Some(mut subscription) = source.subscribe() else {
            debug!("[Recorder] Heading unsupported");
            self.shared.recorder.lock().await.set_heading(None);
            self.shared.emit(RecorderEvent::HeadingChanged(None));
            return false;
        };

        let shared = self.shared.clone();
        let task = tokio::spawn(async move {
            while let Some(reading) = subscription.next().await {
                let heading = {
                    let mut recorder = shared.recorder.lock().await;
                    recorder.set_heading(reading);
                    recorder.heading()
                };
                shared.emit(RecorderEvent::HeadingChanged(heading));
            }
        });
        if let Ok(mut slot) = self.heading_task.lock() {
            *slot = Some(task);
        }
        true
    }

    // ========================================================================
    // Presentation inputs and state
    // ========================================================================

    pub async fn set_follow(&self, follow: bool) {
        self.shared.recorder.lock().await.set_follow(follow);
    }

    pub async fn set_viewport_center(&self, center: GpsPoint) {
        self.shared.recorder.lock().await.set_viewport_center(center);
    }

    pub async fn state(&self) -> RecorderState {
        self.shared.recorder.lock().await.state()
    }

    pub async fn is_tracking(&self) -> bool {
        self.shared.recorder.lock().await.is_tracking()
    }

    pub async fn current_position(&self) -> Option<Fix> {
        self.shared.recorder.lock().await.current_position().copied()
    }

    pub async fn heading(&self) -> Option<f64> {
        self.shared.recorder.lock().await.heading()
    }
}

impl Drop for RecordingService {
    fn drop(&mut self) {
        if let Some(Session { cancel, .. }) = self.session.get_mut().take() {
            let _ = cancel.send(());
        }
        if let Some(task) = self.heading_task.get_mut().ok().and_then(Option::take) {
            task.abort();
        }
    }
}

// ============================================================================
// Session loop
// ============================================================================

async fn run_session(
    shared: Arc<Shared>,
    mut subscription: PositionSubscription,
    mut cancelled: oneshot::Receiver<()>,
) {
    info!("[Recorder] Session started");
    loop {
        let event = tokio::select! {
            biased;
            _ = &mut cancelled => break,
            event = subscription.next() => event,
        };

        match event {
            Some(PositionEvent::Fix(fix)) => shared.handle_fix(fix).await,
            Some(PositionEvent::Error(PositionError::PermissionDenied)) => {
                shared.recorder.lock().await.permission_denied();
                shared.emit(RecorderEvent::PermissionDenied);
                break;
            }
            Some(PositionEvent::Error(e)) => {
                warn!("[Recorder] Position error: {}", TrackingError::from(e));
            }
            None => {
                warn!("[Recorder] Position source ended");
                if shared.recorder.lock().await.stop() {
                    shared.emit(RecorderEvent::Stopped);
                }
                break;
            }
        }
    }
    subscription.cancel();
    info!("[Recorder] Session ended");
}

impl Shared {
    fn emit(&self, event: RecorderEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn handle_fix(&self, fix: Fix) {
        let outcome = self.recorder.lock().await.handle_fix(fix);
        if !outcome.admitted {
            return;
        }

        self.emit(RecorderEvent::PositionUpdated(fix));
        if let Some(center) = outcome.recenter {
            self.emit(RecorderEvent::Recenter(center));
        }

        let Some(point) = outcome.stored else {
            return;
        };
        let day = point.day_key();
        let store = self.store.clone();
        let day_for_write = day.clone();
        let written =
            tokio::task::spawn_blocking(move || store.append_route_point(&day_for_write, &point))
                .await;

        match written {
            Ok(Ok(bucket)) => {
                debug!("[Recorder] Stored point {} in {}", bucket.points.len(), day);
                self.emit(RecorderEvent::PointStored { day, point });
                self.mirror.push_route_bucket(&bucket);
            }
            Ok(Err(e @ StoreError::NonChronological { .. })) => {
                // Not retried, but the segment marker must carry to the next point
                warn!("[Recorder] Dropped out-of-order point: {}", e);
                self.recorder.lock().await.write_failed(&point);
            }
            Ok(Err(e)) => self.store_failed(&point, e.to_string()).await,
            Err(e) => self.store_failed(&point, e.to_string()).await,
        }
    }

    async fn store_failed(&self, point: &RoutePoint, reason: String) {
        error!("[Recorder] Failed to store point: {}", reason);
        self.recorder.lock().await.write_failed(point);
        self.emit(RecorderEvent::StoreFailed(reason));
    }
}
