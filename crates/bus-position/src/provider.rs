//! # Provider
//!
//! Provider defines external data interfaces for the crate.

use anyhow::Result;

use crate::geocode::Address;
use crate::telemetry::RawTelemetrySample;

/// The `PositionFeed` trait defines where raw vehicle positions come from:
/// the live telemetry API or the simulator.
pub trait PositionFeed: Send + Sync {
    /// Fetch the latest sample for every bus slot.
    fn fetch_positions(
        &self,
    ) -> impl Future<Output = realtime::Result<Vec<RawTelemetrySample>>> + Send;

    /// Drop any per-session state. Called when the tracked target changes.
    fn reset(&self) {}
}

/// The `Geocoder` trait defines reverse geocoding: coordinates to address.
pub trait Geocoder: Send + Sync {
    /// Resolve a coordinate. `Ok(None)` when nothing is known about it.
    fn reverse(
        &self, latitude: f64, longitude: f64,
    ) -> impl Future<Output = Result<Option<Address>>> + Send;
}
