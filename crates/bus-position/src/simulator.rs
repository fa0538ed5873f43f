//! Simulated position feed for the demo route.
//!
//! Walks a bus along the route, moving a little on every poll and stepping
//! to the next stop every few polls. State belongs to one feed instance and
//! is rewound whenever the scheduler retargets.

use std::sync::{Arc, Mutex, PoisonError};

use realtime::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::provider::PositionFeed;
use crate::route::RouteModel;
use crate::telemetry::{DeviceStatus, RawTelemetrySample, TelemetryAttributes};

/// Polls spent travelling between two stops.
pub const TICKS_PER_STOP: u32 = 5;

const STEP_LAT: f64 = 0.0006;
const STEP_LON: f64 = 0.0009;
const CRUISE_SPEED_KNOTS: f64 = 16.0;

/// Where the simulated bus currently is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatorState {
    pub latitude: f64,
    pub longitude: f64,
    pub step: u32,
    pub stop_index: usize,
}

impl SimulatorState {
    #[must_use]
    pub const fn at(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude, step: 0, stop_index: 0 }
    }

    /// Move one poll further along `route`. Parks at the terminal stop.
    pub fn advance(&mut self, route: &RouteModel) {
        if route.is_terminal(self.stop_index) {
            return;
        }
        self.step += 1;
        self.latitude += STEP_LAT;
        self.longitude += STEP_LON;
        if self.step.is_multiple_of(TICKS_PER_STOP) {
            self.stop_index = route.next_stop_index(self.stop_index);
        }
    }
}

/// [`PositionFeed`] that fabricates a moving bus in one slot.
#[derive(Debug)]
pub struct SimulatedFeed {
    route: Arc<RouteModel>,
    slot: usize,
    origin: SimulatorState,
    state: Mutex<SimulatorState>,
}

impl SimulatedFeed {
    #[must_use]
    pub fn new(route: Arc<RouteModel>, slot: usize, latitude: f64, longitude: f64) -> Self {
        let origin = SimulatorState::at(latitude, longitude);
        Self { route, slot, origin, state: Mutex::new(origin) }
    }

    #[must_use]
    pub fn state(&self) -> SimulatorState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_sample(&self) -> RawTelemetrySample {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let current = *state;
        state.advance(&self.route);
        drop(state);

        let parked = self.route.is_terminal(current.stop_index);
        let travelled_km = self
            .route
            .stop(current.stop_index)
            .map_or(0.0, |stop| stop.distance_from_origin_km);

        let mut sample = RawTelemetrySample::at(self.slot, current.latitude, current.longitude)
            .with_index(i64::try_from(current.stop_index).unwrap_or(i64::MAX));
        sample.device_id = Some(format!("sim-{}", self.slot));
        sample.name = Some("Simulated bus".to_string());
        sample.speed = if parked { 0.0 } else { CRUISE_SPEED_KNOTS };
        sample.heading = STEP_LON.atan2(STEP_LAT).to_degrees();
        sample.status = DeviceStatus::Online;
        sample.attributes = TelemetryAttributes {
            motion: Some(!parked),
            ignition: Some(true),
            today_distance: Some(travelled_km * 1000.0),
            stop_index: Some(sample.index),
            ..TelemetryAttributes::default()
        };
        sample
    }
}

impl PositionFeed for SimulatedFeed {
    async fn fetch_positions(&self) -> Result<Vec<RawTelemetrySample>> {
        Ok(vec![self.next_sample()])
    }

    fn reset(&self) {
        debug!(slot = self.slot, "rewinding simulator");
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = self.origin;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::demo_route;

    fn feed() -> SimulatedFeed {
        SimulatedFeed::new(Arc::new(demo_route()), 2, 11.5412, 75.6231)
    }

    #[tokio::test]
    async fn moves_each_poll() {
        let feed = feed();
        let first = feed.fetch_positions().await.expect("simulated");
        let second = feed.fetch_positions().await.expect("simulated");

        assert_eq!(first.len(), 1);
        assert_eq!(first[0].slot, 2);
        assert!(first[0].validate().is_ok());
        assert!(second[0].latitude > first[0].latitude);
        assert_eq!(feed.state().step, 2);
    }

    #[tokio::test]
    async fn walks_to_terminal_and_parks() {
        let feed = feed();
        let mut last = None;
        for _ in 0..(TICKS_PER_STOP * 10) {
            last = feed.fetch_positions().await.expect("simulated").pop();
        }

        let last = last.expect("sample");
        assert_eq!(last.index, 6);
        assert_eq!(last.attributes.motion, Some(false));
        assert!(last.speed.abs() < f64::EPSILON);
        assert_eq!(feed.state().stop_index, 6);
    }

    #[tokio::test]
    async fn reset_rewinds() {
        let feed = feed();
        for _ in 0..7 {
            feed.fetch_positions().await.expect("simulated");
        }
        assert_eq!(feed.state().stop_index, 1);

        feed.reset();
        assert_eq!(feed.state(), SimulatorState::at(11.5412, 75.6231));
    }
}
