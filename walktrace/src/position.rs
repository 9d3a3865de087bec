//! Position and heading sources.
//!
//! The positioning hardware lives outside the core. A host pushes readings
//! into a [`PositionBridge`] (or [`HeadingBridge`]); the core consumes them as
//! a [`Subscription`], which is a `futures::Stream` that ends when the host
//! side goes away or the subscriber cancels.

use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use log::{debug, warn};
use tokio::sync::mpsc;
use tracekit::Fix;

use crate::error::TrackingError;

/// Readings buffered between the host and the recording loop.
const SUBSCRIPTION_BUFFER: usize = 128;

/// Options passed to the position source when subscribing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionRequest {
    /// Default: false
    pub high_accuracy: bool,
    /// Default: 15 s
    pub timeout: Duration,
    /// Oldest cached fix the source may hand back.
    /// Default: 0 (always fresh)
    pub maximum_age: Duration,
}

impl Default for PositionRequest {
    fn default() -> Self {
        Self {
            high_accuracy: false,
            timeout: Duration::from_secs(15),
            maximum_age: Duration::ZERO,
        }
    }
}

/// Failure signals a position source can deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionError {
    /// Not recoverable without user action; ends the session
    PermissionDenied,
    Timeout,
    /// Transient; the stream continues
    Unavailable(String),
}

impl From<PositionError> for TrackingError {
    fn from(e: PositionError) -> Self {
        match e {
            PositionError::PermissionDenied => TrackingError::PermissionDenied,
            PositionError::Timeout => TrackingError::Timeout,
            PositionError::Unavailable(reason) => TrackingError::Unavailable(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PositionEvent {
    Fix(Fix),
    Error(PositionError),
}

// ============================================================================
// Subscriptions
// ============================================================================

/// A live feed of readings from a source.
pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
}

pub type PositionSubscription = Subscription<PositionEvent>;

/// Compass headings in degrees. `None` means the heading is unknown right now.
pub type HeadingSubscription = Subscription<Option<f64>>;

impl<T> Subscription<T> {
    /// Paired sender and subscription.
    pub fn channel() -> (mpsc::Sender<T>, Self) {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        (tx, Self { rx })
    }

    /// Stop receiving. Readings already buffered are still yielded.
    pub fn cancel(&mut self) {
        self.rx.close();
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

/// Anything that can deliver fixes.
pub trait PositionSource: Send + Sync {
    fn subscribe(&self, request: PositionRequest) -> PositionSubscription;
}

/// Anything that may deliver compass headings.
pub trait HeadingSource: Send + Sync {
    /// `None` when the device has no compass.
    fn subscribe(&self) -> Option<HeadingSubscription>;
}

// ============================================================================
// Bridges
// ============================================================================

/// Push-based position source for hosts that receive fixes via callbacks.
///
/// Only the most recent subscription receives readings. Pushing with no live
/// subscriber is a no-op.
#[derive(Default)]
pub struct PositionBridge {
    sender: Mutex<Option<mpsc::Sender<PositionEvent>>>,
    request: Mutex<Option<PositionRequest>>,
}

impl PositionBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a fix. Returns false if nobody is listening.
    pub fn push_fix(&self, fix: Fix) -> bool {
        self.push(PositionEvent::Fix(fix))
    }

    pub fn push_error(&self, error: PositionError) -> bool {
        self.push(PositionEvent::Error(error))
    }

    /// What the current subscriber asked for, so the host can configure hardware.
    pub fn active_request(&self) -> Option<PositionRequest> {
        if !self.is_subscribed() {
            return None;
        }
        self.request.lock().ok().and_then(|r| *r)
    }

    pub fn is_subscribed(&self) -> bool {
        self.sender
            .lock()
            .ok()
            .and_then(|s| s.as_ref().map(|tx| !tx.is_closed()))
            .unwrap_or(false)
    }

    fn push(&self, event: PositionEvent) -> bool {
        let Ok(guard) = self.sender.lock() else {
            return false;
        };
        match guard.as_ref() {
            Some(tx) => match tx.try_send(event) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("[Position] Subscriber is behind, dropping reading");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            },
            None => false,
        }
    }
}

impl PositionSource for PositionBridge {
    fn subscribe(&self, request: PositionRequest) -> PositionSubscription {
        let (tx, subscription) = Subscription::channel();
        if let Ok(mut sender) = self.sender.lock() {
            *sender = Some(tx);
        }
        if let Ok(mut active) = self.request.lock() {
            *active = Some(request);
        }
        debug!("[Position] Subscribed (high accuracy: {})", request.high_accuracy);
        subscription
    }
}

/// Push-based heading source. Constructed unsupported, it never subscribes.
pub struct HeadingBridge {
    supported: bool,
    sender: Mutex<Option<mpsc::Sender<Option<f64>>>>,
}

impl HeadingBridge {
    pub fn new(supported: bool) -> Self {
        Self {
            supported,
            sender: Mutex::new(None),
        }
    }

    /// Deliver a heading. Returns false if nobody is listening.
    pub fn push_heading(&self, heading: Option<f64>) -> bool {
        let Ok(guard) = self.sender.lock() else {
            return false;
        };
        guard
            .as_ref()
            .is_some_and(|tx| tx.try_send(heading).is_ok())
    }
}

impl HeadingSource for HeadingBridge {
    fn subscribe(&self) -> Option<HeadingSubscription> {
        if !self.supported {
            return None;
        }
        let (tx, subscription) = Subscription::channel();
        if let Ok(mut sender) = self.sender.lock() {
            *sender = Some(tx);
        }
        Some(subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_bridge_delivers_in_order() {
        let bridge = PositionBridge::new();
        assert!(!bridge.push_fix(Fix::new(35.0, 135.0, Utc::now())));

        let mut subscription = bridge.subscribe(PositionRequest::default());
        assert!(bridge.is_subscribed());
        assert!(bridge.push_fix(Fix::new(35.0, 135.0, Utc::now())));
        assert!(bridge.push_error(PositionError::Timeout));

        assert!(matches!(subscription.next().await, Some(PositionEvent::Fix(_))));
        assert_eq!(
            subscription.next().await,
            Some(PositionEvent::Error(PositionError::Timeout))
        );
    }

    #[tokio::test]
    async fn test_cancel_ends_stream() {
        let bridge = PositionBridge::new();
        let mut subscription = bridge.subscribe(PositionRequest::default());
        bridge.push_fix(Fix::new(35.0, 135.0, Utc::now()));
        subscription.cancel();

        assert!(!bridge.is_subscribed());
        assert!(!bridge.push_fix(Fix::new(35.0, 135.0, Utc::now())));
        // Buffered reading is still delivered, then the stream ends
        assert!(subscription.next().await.is_some());
        assert!(subscription.next().await.is_none());
    }

    #[test]
    fn test_active_request_tracks_subscriber() {
        let bridge = PositionBridge::new();
        assert!(bridge.active_request().is_none());

        let request = PositionRequest {
            high_accuracy: true,
            ..PositionRequest::default()
        };
        let subscription = bridge.subscribe(request);
        assert_eq!(bridge.active_request(), Some(request));

        drop(subscription);
        assert!(bridge.active_request().is_none());
    }

    #[test]
    fn test_unsupported_heading() {
        assert!(HeadingBridge::new(false).subscribe().is_none());
        let bridge = HeadingBridge::new(true);
        let _subscription = bridge.subscribe().unwrap();
        assert!(bridge.push_heading(Some(90.0)));
    }

    #[test]
    fn test_position_error_mapping() {
        assert_eq!(
            TrackingError::from(PositionError::PermissionDenied),
            TrackingError::PermissionDenied
        );
        assert_eq!(
            TrackingError::from(PositionError::Unavailable("no signal".into())),
            TrackingError::Unavailable("no signal".into())
        );
    }
}
