//! Reverse geocoding
//!
//! Best-effort place names for tracked positions. Lookups run off the
//! polling path; a failed lookup degrades to the coordinate string.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use http::header::{ACCEPT, USER_AGENT};
use http::{Method, StatusCode};
use http_body_util::Empty;
use realtime::{Error, HttpRequest};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::provider::Geocoder;

/// Structured address returned by a geocoder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Address {
    pub display_name: Option<String>,
    pub road: Option<String>,
    pub suburb: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
}

impl Address {
    /// Short human label: `road, suburb, city`, else the full display name.
    #[must_use]
    pub fn label(&self) -> Option<String> {
        let parts: Vec<&str> = [&self.road, &self.suburb, &self.city]
            .into_iter()
            .filter_map(|part| part.as_deref().map(str::trim).filter(|p| !p.is_empty()))
            .collect();
        if !parts.is_empty() {
            return Some(parts.join(", "));
        }
        self.display_name.as_deref().map(str::trim).filter(|name| !name.is_empty()).map(ToString::to_string)
    }
}

/// Display fallback used whenever no place name is available.
#[must_use]
pub fn coordinate_label(latitude: f64, longitude: f64) -> String {
    format!("{latitude:.6}, {longitude:.6}")
}

/// Resolves coordinates to a display name, never failing.
#[derive(Debug)]
pub struct GeocodeEnricher<G: Geocoder> {
    geocoder: Arc<G>,
    timeout: Duration,
}

impl<G: Geocoder> Clone for GeocodeEnricher<G> {
    fn clone(&self) -> Self {
        Self { geocoder: Arc::clone(&self.geocoder), timeout: self.timeout }
    }
}

impl<G: Geocoder> GeocodeEnricher<G> {
    #[must_use]
    pub const fn new(geocoder: Arc<G>, timeout: Duration) -> Self {
        Self { geocoder, timeout }
    }

    /// Place name for the coordinate, or `"{lat:.6}, {lon:.6}"` when the
    /// lookup fails, finds nothing, or takes longer than the timeout.
    pub async fn resolve(&self, latitude: f64, longitude: f64) -> String {
        let lookup = tokio::time::timeout(self.timeout, self.geocoder.reverse(latitude, longitude));
        let err = match lookup.await {
            Ok(Ok(Some(address))) => match address.label() {
                Some(label) => return label,
                None => Error::GeocodeFailed("address has no usable label".to_string()),
            },
            Ok(Ok(None)) => Error::GeocodeFailed("no address for coordinate".to_string()),
            Ok(Err(e)) => Error::GeocodeFailed(format!("{e:#}")),
            Err(_elapsed) => Error::GeocodeFailed(format!("timed out after {:?}", self.timeout)),
        };

        debug!(latitude, longitude, error = %err, "using coordinate label");
        coordinate_label(latitude, longitude)
    }
}

/// Reverse geocoder for a Nominatim compatible `/reverse` endpoint.
#[derive(Debug)]
pub struct HttpGeocoder<P: HttpRequest> {
    provider: Arc<P>,
    base_url: String,
}

impl<P: HttpRequest> HttpGeocoder<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, base_url: impl Into<String>) -> Self {
        Self { provider, base_url: base_url.into() }
    }
}

impl<P: HttpRequest> Geocoder for HttpGeocoder<P> {
    async fn reverse(&self, latitude: f64, longitude: f64) -> Result<Option<Address>> {
        let url = format!(
            "{}/reverse?format=jsonv2&lat={latitude}&lon={longitude}",
            self.base_url.trim_end_matches('/')
        );
        let request = http::Request::builder()
            .method(Method::GET)
            .uri(&url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, concat!("bus-tracker/", env!("CARGO_PKG_VERSION")))
            .body(Empty::<Bytes>::new())
            .context("building reverse geocode request")?;

        let response =
            self.provider.fetch(request).await.context("reverse geocode request failed")?;

        match response.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            status if !status.is_success() => bail!("HTTP {status} from geocoder"),
            _ => {}
        }

        let reply: ReverseReply = serde_json::from_slice(response.body())
            .context("deserializing reverse geocode response")?;
        if reply.error.is_some() {
            return Ok(None);
        }
        Ok(Some(reply.into()))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReverseReply {
    display_name: Option<String>,
    address: Option<ReverseAddress>,
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReverseAddress {
    road: Option<String>,
    suburb: Option<String>,
    neighbourhood: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    state: Option<String>,
    country: Option<String>,
}

impl From<ReverseReply> for Address {
    fn from(reply: ReverseReply) -> Self {
        let address = reply.address.unwrap_or_default();
        Self {
            display_name: reply.display_name,
            road: address.road,
            suburb: address.suburb.or(address.neighbourhood),
            city: address.city.or(address.town).or(address.village),
            state: address.state,
            country: address.country,
        }
    }
}
