//! Position reconciler
//!
//! Turns a stream of raw, unreliable telemetry samples into one stable
//! tracked position. Bad or missing samples never move the pin: the last
//! known good fix is kept and only the connection status changes.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::route::RouteModel;
use crate::telemetry::{DeviceStatus, RawTelemetrySample};

const KNOTS_TO_KMH: f64 = 1.852;

/// Banner shown once the retry budget is spent.
pub const LOST_BANNER: &str = "Live location unavailable. Showing last known position.";

/// Connection state shown next to the tracked position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionStatus {
    /// No fetch has completed yet.
    #[default]
    Connecting,
    Online,
    Offline,
    Unknown,

    /// The last sample carried no usable fix.
    NoFix,

    /// The last fetch returned nothing for the tracked slot.
    Reconnecting,

    /// Retries exhausted.
    Lost,

    /// A placeholder position is shown.
    Synthetic,
}

impl ConnectionStatus {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Connecting => "Connecting",
            Self::Online => "Online",
            Self::Offline => "Offline",
            Self::Unknown => "Unknown",
            Self::NoFix => "No GPS fix",
            Self::Reconnecting => "Reconnecting",
            Self::Lost => "Connection lost",
            Self::Synthetic => "Simulated",
        }
    }
}

impl From<DeviceStatus> for ConnectionStatus {
    fn from(status: DeviceStatus) -> Self {
        match status {
            DeviceStatus::Online => Self::Online,
            DeviceStatus::Offline => Self::Offline,
            DeviceStatus::Unknown => Self::Unknown,
        }
    }
}

/// The stable, user-facing position of the tracked bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedPosition {
    pub device_id: Option<String>,
    pub latitude: f64,
    pub longitude: f64,

    /// Route progress in `[0, 1]`.
    pub progress_fraction: f64,

    /// Stop index in `[0, N-1]`.
    pub current_stop_index: usize,
    pub last_updated_at: DateTime<Utc>,
    pub place_name: Option<String>,
    pub speed_kmh: f64,

    /// Heading in `[0, 360)`.
    pub heading_deg: f64,
    pub connection_status: ConnectionStatus,
    pub motion: Option<bool>,
    pub today_distance_km: f64,
    pub total_distance_km: f64,

    /// Placeholder position, not a real fix.
    pub synthetic: bool,
}

impl TrackedPosition {
    #[must_use]
    pub const fn motion_label(&self) -> &'static str {
        match self.motion {
            Some(true) => "Moving",
            Some(false) => "Stopped",
            None => "N/A",
        }
    }

    #[must_use]
    pub fn place_label(&self) -> &str {
        self.place_name.as_deref().unwrap_or("N/A")
    }

    #[must_use]
    pub fn today_distance_label(&self) -> String {
        format!("{:.2} km", self.today_distance_km)
    }

    #[must_use]
    pub fn total_distance_label(&self) -> String {
        format!("{:.2} km", self.total_distance_km)
    }
}

/// One point of the rendered trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    pub place_name: Option<String>,
    #[serde(skip)]
    seq: u64,
}

/// Bounded FIFO of recent fixes. The oldest point is evicted first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathHistory {
    points: VecDeque<PathPoint>,
    capacity: usize,
}

impl PathHistory {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { points: VecDeque::with_capacity(capacity), capacity }
    }

    fn push(&mut self, point: PathPoint) {
        while self.points.len() >= self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    fn set_place_name(&mut self, seq: u64, name: &str) {
        if let Some(point) = self.points.iter_mut().rev().find(|p| p.seq == seq) {
            point.place_name = Some(name.to_string());
        }
    }

    fn clear(&mut self) {
        self.points.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn first(&self) -> Option<&PathPoint> {
        self.points.front()
    }

    #[must_use]
    pub fn last(&self) -> Option<&PathPoint> {
        self.points.back()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &PathPoint> {
        self.points.iter()
    }
}

/// Owns the tracked position and trail for one session.
///
/// All mutation goes through [`PositionReconciler::update`] and the few
/// targeted setters below; the scheduler serialises access.
#[derive(Debug)]
pub struct PositionReconciler {
    route: Arc<RouteModel>,
    position: Option<TrackedPosition>,
    history: PathHistory,
    status: ConnectionStatus,
    terminal_reached: bool,
    retries_exhausted: bool,
    fix_seq: u64,
    place_seq: u64,
}

impl PositionReconciler {
    #[must_use]
    pub fn new(route: Arc<RouteModel>, history_capacity: usize) -> Self {
        Self {
            route,
            position: None,
            history: PathHistory::new(history_capacity),
            status: ConnectionStatus::Connecting,
            terminal_reached: false,
            retries_exhausted: false,
            fix_seq: 0,
            place_seq: 0,
        }
    }

    /// Fold the latest fetch result into the tracked position.
    ///
    /// `None` (nothing for the tracked slot) and invalid samples leave the
    /// position untouched and only update the connection status.
    pub fn update(&mut self, sample: Option<&RawTelemetrySample>) -> Option<&TrackedPosition> {
        self.retries_exhausted = false;

        let Some(sample) = sample else {
            self.set_status(ConnectionStatus::Reconnecting);
            return self.position.as_ref();
        };

        if let Err(err) = sample.validate() {
            debug!(slot = sample.slot, error = %err, "keeping last known position");
            self.set_status(ConnectionStatus::NoFix);
            return self.position.as_ref();
        }

        self.apply_fix(sample);
        self.position.as_ref()
    }

    fn apply_fix(&mut self, sample: &RawTelemetrySample) {
        let mut index = self.route.clamp_index(sample.index);
        let mut progress = sample
            .reported_progress
            .filter(|p| p.is_finite())
            .map_or_else(|| self.route.progress_at(index), |p| p.clamp(0.0, 1.0));

        if self.route.is_terminal(index) && !self.terminal_reached {
            info!(slot = sample.slot, stop = index, "reached terminal stop");
            self.terminal_reached = true;
        }
        if self.terminal_reached {
            index = self.route.last_index();
            progress = 1.0;
        }

        self.fix_seq += 1;
        let status = ConnectionStatus::from(sample.status);
        let last_updated_at = sample.fix_time.unwrap_or_else(Utc::now);

        // keep the previous label until the geocoder catches up
        let place_name =
            self.position.as_ref().filter(|p| !p.synthetic).and_then(|p| p.place_name.clone());

        let attributes = &sample.attributes;
        self.position = Some(TrackedPosition {
            device_id: sample.device_id.clone(),
            latitude: sample.latitude,
            longitude: sample.longitude,
            progress_fraction: progress,
            current_stop_index: index,
            last_updated_at,
            place_name,
            speed_kmh: finite_or_zero(sample.speed).max(0.0) * KNOTS_TO_KMH,
            heading_deg: finite_or_zero(sample.heading).rem_euclid(360.0),
            connection_status: status,
            motion: attributes.motion,
            today_distance_km: metres_to_km(attributes.today_distance),
            total_distance_km: metres_to_km(attributes.total_distance),
            synthetic: false,
        });
        self.status = status;

        self.history.push(PathPoint {
            latitude: sample.latitude,
            longitude: sample.longitude,
            timestamp: last_updated_at,
            place_name: None,
            seq: self.fix_seq,
        });
    }

    /// Sequence number of the latest real fix, if any.
    #[must_use]
    pub fn last_fix_seq(&self) -> Option<u64> {
        self.position.as_ref().filter(|p| !p.synthetic).map(|_| self.fix_seq)
    }

    /// Attach a resolved place name to fix `seq`.
    ///
    /// Results older than one already applied are rejected. Returns whether
    /// the name was applied.
    pub fn apply_place_name(&mut self, seq: u64, name: &str) -> bool {
        if seq < self.place_seq || seq > self.fix_seq {
            return false;
        }
        let Some(position) = self.position.as_mut().filter(|p| !p.synthetic) else {
            return false;
        };

        position.place_name = Some(name.to_string());
        self.history.set_place_name(seq, name);
        self.place_seq = seq;
        true
    }

    /// Retries are spent; the last known position stays on screen.
    pub fn mark_retries_exhausted(&mut self) {
        self.retries_exhausted = true;
        self.set_status(ConnectionStatus::Lost);
    }

    /// Show a flagged placeholder. Only applies while no real fix exists.
    pub fn apply_synthetic(&mut self, latitude: f64, longitude: f64) -> bool {
        if self.position.as_ref().is_some_and(|p| !p.synthetic) {
            return false;
        }

        self.position = Some(TrackedPosition {
            device_id: None,
            latitude,
            longitude,
            progress_fraction: 0.0,
            current_stop_index: 0,
            last_updated_at: Utc::now(),
            place_name: None,
            speed_kmh: 0.0,
            heading_deg: 0.0,
            connection_status: ConnectionStatus::Synthetic,
            motion: None,
            today_distance_km: 0.0,
            total_distance_km: 0.0,
            synthetic: true,
        });
        self.status = ConnectionStatus::Synthetic;
        true
    }

    /// Forget everything about the tracked entity.
    pub fn reset(&mut self) {
        self.position = None;
        self.history.clear();
        self.status = ConnectionStatus::Connecting;
        self.terminal_reached = false;
        self.retries_exhausted = false;
        self.fix_seq = 0;
        self.place_seq = 0;
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        self.status = status;
        if let Some(position) = self.position.as_mut() {
            position.connection_status = status;
        }
    }

    #[must_use]
    pub const fn position(&self) -> Option<&TrackedPosition> {
        self.position.as_ref()
    }

    #[must_use]
    pub const fn history(&self) -> &PathHistory {
        &self.history
    }

    #[must_use]
    pub const fn status(&self) -> ConnectionStatus {
        self.status
    }

    #[must_use]
    pub const fn terminal_reached(&self) -> bool {
        self.terminal_reached
    }

    /// User-visible banner, set only while retries are exhausted.
    #[must_use]
    pub const fn banner(&self) -> Option<&'static str> {
        if self.retries_exhausted { Some(LOST_BANNER) } else { None }
    }
}

const fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

fn metres_to_km(metres: Option<f64>) -> f64 {
    let km = metres.filter(|m| m.is_finite()).unwrap_or_default() / 1000.0;
    (km * 100.0).round() / 100.0
}
