//! Reverse geocoding for photo-sorter.
//!
//! This module converts a `GeoCoordinate` into a country and city name using a
//! Nominatim-compatible HTTP service (`GET /reverse?format=json&lat=..&lon=..`).
//!
//! The public Nominatim instance rejects anonymous clients and allows at most one request
//! per second, so every client sends an identifying User-Agent and routes calls through a
//! shared `RateLimiter`. Lookup failures of any kind are logged and reported as `None`;
//! they never stop a photo from being filed.

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use log::{debug, warn};
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

use crate::config::Config;
use crate::exif::GeoCoordinate;

/// Placeholder used when the service omits a name
pub const UNKNOWN: &str = "Unknown";

/// A resolved place name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationName {
    pub country: String,
    pub city: String,
}

impl fmt::Display for LocationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.city, self.country)
    }
}

/// Interface for reverse geocoding services
pub trait ReverseGeocoder: Send + Sync {
    /// Resolve a coordinate to a place name, or `None` if it cannot be resolved
    fn resolve(&self, coordinate: GeoCoordinate) -> BoxFuture<'_, Option<LocationName>>;
}

/// Spaces out calls so that no two start less than `interval` apart.
///
/// Every caller waits at least one full interval, and concurrent callers queue behind each
/// other on a shared schedule rather than each sleeping independently.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_slot: Mutex::new(None),
        }
    }

    /// Waits for this caller's turn
    pub async fn wait(&self) {
        let slot = {
            let mut last_slot = self.last_slot.lock().await;
            let now = Instant::now();
            let slot = last_slot.map_or(now, |last| last.max(now)) + self.interval;
            *last_slot = Some(slot);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    address: Option<Address>,
}

#[derive(Debug, Deserialize)]
struct Address {
    country: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
}

impl Address {
    fn into_location(self) -> LocationName {
        let non_empty = |name: Option<String>| name.filter(|n| !n.trim().is_empty());

        let city = non_empty(self.city)
            .or_else(|| non_empty(self.town))
            .or_else(|| non_empty(self.village))
            .unwrap_or_else(|| UNKNOWN.to_string());
        let country = non_empty(self.country).unwrap_or_else(|| UNKNOWN.to_string());

        LocationName { country, city }
    }
}

/// Client for the Nominatim reverse geocoding API
pub struct NominatimClient {
    client: Client,
    endpoint: Url,
    limiter: RateLimiter,
}

impl NominatimClient {
    pub fn new(
        base_url: &str,
        user_agent: &str,
        interval: Duration,
        timeout: Duration,
    ) -> Result<Self> {
        // A trailing slash keeps any path prefix of the base URL when joining
        let mut base = base_url.trim_end_matches('/').to_string();
        base.push('/');
        let endpoint = Url::parse(&base)
            .and_then(|base| base.join("reverse"))
            .with_context(|| format!("Invalid geocoder URL: {base_url}"))?;

        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint,
            limiter: RateLimiter::new(interval),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.geocoder_url,
            &config.user_agent,
            config.geocode_interval(),
            config.geocode_timeout(),
        )
    }

    /// Performs one rate-limited lookup
    pub async fn lookup(&self, coordinate: GeoCoordinate) -> Result<Option<LocationName>> {
        self.limiter.wait().await;

        debug!("Reverse geocoding {coordinate}");
        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[
                ("format", "json".to_string()),
                ("lat", coordinate.latitude().to_string()),
                ("lon", coordinate.longitude().to_string()),
            ])
            .send()
            .await
            .with_context(|| format!("Failed to GET {}", self.endpoint))?
            .error_for_status()
            .context("Geocoding service returned an error status")?;

        let text = response
            .text()
            .await
            .context("Failed to read geocoding response")?;
        let body: ReverseResponse =
            serde_json::from_str(&text).context("Failed to parse geocoding response")?;

        Ok(body.address.map(Address::into_location))
    }
}

impl ReverseGeocoder for NominatimClient {
    fn resolve(&self, coordinate: GeoCoordinate) -> BoxFuture<'_, Option<LocationName>> {
        Box::pin(async move {
            match self.lookup(coordinate).await {
                Ok(Some(location)) => Some(location),
                Ok(None) => {
                    debug!("No address known for {coordinate}");
                    None
                }
                Err(e) => {
                    warn!("Failed to geocode {coordinate}: {e:#}");
                    None
                }
            }
        })
    }
}

/// Factory function to create the geocoding service described by the config
pub fn create_geocoding_service(config: &Config) -> Result<Arc<dyn ReverseGeocoder>> {
    Ok(Arc::new(NominatimClient::from_config(config)?))
}
