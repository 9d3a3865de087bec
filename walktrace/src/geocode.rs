//! Reverse geocoding with provider fallback.
//!
//! Lookup order:
//! 1. primary provider (OpenCage-style), only when a key is configured
//! 2. fallback provider (Nominatim-style), spaced at least
//!    [`GeocodeConfig::fallback_interval`] apart across all callers
//! 3. a deterministic offline placeholder
//!
//! Provider answers are cached by coordinates rounded to 5 decimals.
//! Placeholders are not cached, so a later lookup can still succeed.

use std::num::NonZeroUsize;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use log::{debug, warn};
use lru::LruCache;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::GeocodeConfig;
use crate::error::GeocodeError;

/// Where an address came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GeocodeSource {
    Primary,
    Fallback,
    OfflinePlaceholder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeocodeResult {
    pub address: String,
    pub source: GeocodeSource,
}

/// Placeholder address used when no provider answers.
pub fn offline_address(lat: f64, lng: f64) -> String {
    format!("lat {:.5}, lng {:.5}", lat, lng)
}

fn cache_key(lat: f64, lng: f64) -> String {
    format!("{:.5},{:.5}", lat, lng)
}

// ============================================================================
// Rate limiting
// ============================================================================

/// Spaces out request starts. Each caller reserves the next free slot, then
/// sleeps outside the lock until it arrives.
struct DispatchRateLimiter {
    next_dispatch: Mutex<Instant>,
    interval: Duration,
}

impl DispatchRateLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            next_dispatch: Mutex::new(Instant::now()),
            interval,
        }
    }

    async fn wait_for_dispatch_slot(&self) {
        let wait = {
            let mut next = self.next_dispatch.lock().await;
            let now = Instant::now();
            let dispatch_at = if *next > now { *next } else { now };
            *next = dispatch_at + self.interval;
            dispatch_at.saturating_duration_since(now)
        };

        if !wait.is_zero() {
            debug!("[Geocode] Waiting {:?} for fallback slot", wait);
            tokio::time::sleep(wait).await;
        }
    }
}

// ============================================================================
// Provider responses
// ============================================================================

#[derive(Debug, Deserialize)]
struct PrimaryResponse {
    #[serde(default)]
    results: Vec<PrimaryResult>,
}

#[derive(Debug, Deserialize)]
struct PrimaryResult {
    formatted: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FallbackResponse {
    display_name: Option<String>,
}

fn non_empty(address: Option<String>) -> Result<String, GeocodeError> {
    address
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .ok_or(GeocodeError::NoResult)
}

// ============================================================================
// Geocoder
// ============================================================================

pub struct Geocoder {
    config: GeocodeConfig,
    client: Client,
    limiter: DispatchRateLimiter,
    cache: StdMutex<LruCache<String, GeocodeResult>>,
}

impl Geocoder {
    pub fn new(config: GeocodeConfig) -> Result<Self, GeocodeError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("walktrace/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let capacity = NonZeroUsize::new(config.cache_size).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            limiter: DispatchRateLimiter::new(config.fallback_interval),
            cache: StdMutex::new(LruCache::new(capacity)),
            client,
            config,
        })
    }

    /// Resolve an address. Never fails: the worst case is the placeholder.
    pub async fn reverse_geocode(&self, lat: f64, lng: f64) -> GeocodeResult {
        let key = cache_key(lat, lng);
        if let Some(hit) = self.cache.lock().ok().and_then(|mut c| c.get(&key).cloned()) {
            return hit;
        }

        if let Some(api_key) = self.config.opencage_key.as_deref() {
            match self.fetch_primary(lat, lng, api_key).await {
                Ok(address) => return self.remember(key, address, GeocodeSource::Primary),
                Err(e) => warn!("[Geocode] Primary lookup failed: {}", e),
            }
        }

        match self.fetch_fallback(lat, lng).await {
            Ok(address) => return self.remember(key, address, GeocodeSource::Fallback),
            Err(e) => warn!("[Geocode] Fallback lookup failed: {}", e),
        }

        GeocodeResult {
            address: offline_address(lat, lng),
            source: GeocodeSource::OfflinePlaceholder,
        }
    }

    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    fn remember(&self, key: String, address: String, source: GeocodeSource) -> GeocodeResult {
        let result = GeocodeResult { address, source };
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, result.clone());
        }
        result
    }

    async fn fetch_primary(&self, lat: f64, lng: f64, api_key: &str) -> Result<String, GeocodeError> {
        let response = self
            .client
            .get(&self.config.opencage_url)
            .query(&[
                ("q", format!("{},{}", lat, lng)),
                ("key", api_key.to_string()),
                ("language", self.config.language.clone()),
                ("no_record", "1".to_string()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(GeocodeError::Status(response.status().as_u16()));
        }
        let body: PrimaryResponse = response.json().await?;
        non_empty(body.results.into_iter().next().and_then(|r| r.formatted))
    }

    async fn fetch_fallback(&self, lat: f64, lng: f64) -> Result<String, GeocodeError> {
        self.limiter.wait_for_dispatch_slot().await;
        let response = self
            .client
            .get(&self.config.nominatim_url)
            .query(&[
                ("lat", lat.to_string()),
                ("lon", lng.to_string()),
                ("format", "jsonv2".to_string()),
                ("accept-language", self.config.language.clone()),
                ("email", self.config.contact_email.clone()),
            ])
            .header(reqwest::header::ACCEPT_LANGUAGE, self.config.language.as_str())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(GeocodeError::Status(response.status().as_u16()));
        }
        let body: FallbackResponse = response.json().await?;
        non_empty(body.display_name)
    }
}
