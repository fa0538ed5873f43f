//! Static route definition.
//!
//! A route is the ordered list of stops a bus serves. It is fixed at startup
//! and only ever read; progress math depends on its clamping and terminal
//! detection.

use realtime::{Error, Result};
use serde::{Deserialize, Serialize};

/// A stop on the route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stop {
    /// Display name.
    pub name: String,

    /// Position of the stop in route order.
    pub sequence_index: usize,

    /// Distance travelled from the first stop, in kilometres.
    pub distance_from_origin_km: f64,
}

impl Stop {
    #[must_use]
    pub fn new(name: impl Into<String>, sequence_index: usize, distance_from_origin_km: f64) -> Self {
        Self { name: name.into(), sequence_index, distance_from_origin_km }
    }
}

/// Immutable, ordered list of stops.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteModel {
    stops: Vec<Stop>,
}

impl RouteModel {
    /// Build a route from stops given in route order.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoute` when the list is empty, a distance is
    /// not finite, or sequence indexes and distances are not both strictly
    /// increasing.
    pub fn new(stops: Vec<Stop>) -> Result<Self> {
        if stops.is_empty() {
            return Err(Error::InvalidRoute("route has no stops".to_string()));
        }
        if let Some(stop) = stops.iter().find(|stop| !stop.distance_from_origin_km.is_finite()) {
            return Err(Error::InvalidRoute(format!(
                "stop {} has no usable distance from origin",
                stop.name
            )));
        }

        for pair in stops.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.sequence_index <= prev.sequence_index {
                return Err(Error::InvalidRoute(format!(
                    "stop {} is out of sequence after {}",
                    next.name, prev.name
                )));
            }
            if next.distance_from_origin_km <= prev.distance_from_origin_km {
                return Err(Error::InvalidRoute(format!(
                    "stop {} is not further from origin than {}",
                    next.name, prev.name
                )));
            }
        }

        Ok(Self { stops })
    }

    /// Number of stops.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.stops.len()
    }

    /// Always false: a route holds at least one stop.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    /// Index of the terminal stop.
    #[must_use]
    pub const fn last_index(&self) -> usize {
        self.stops.len().saturating_sub(1)
    }

    #[must_use]
    pub fn stop(&self, index: usize) -> Option<&Stop> {
        self.stops.get(index)
    }

    #[must_use]
    pub fn stops(&self) -> &[Stop] {
        &self.stops
    }

    /// The stop after `current`, clamped to the terminal stop.
    #[must_use]
    pub fn next_stop_index(&self, current: usize) -> usize {
        current.saturating_add(1).min(self.last_index())
    }

    #[must_use]
    pub const fn is_terminal(&self, index: usize) -> bool {
        index == self.last_index()
    }

    /// Clamp a raw upstream index into `[0, N-1]`.
    #[must_use]
    pub fn clamp_index(&self, raw: i64) -> usize {
        usize::try_from(raw).map_or(0, |index| index.min(self.last_index()))
    }

    /// Fraction of the route covered on reaching the stop at `index`.
    ///
    /// Distance based; falls back to an even split by index when the route
    /// has no length (single stop).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress_at(&self, index: usize) -> f64 {
        let index = index.min(self.last_index());
        if self.is_terminal(index) {
            return 1.0;
        }

        let origin = self.stops[0].distance_from_origin_km;
        let total = self.stops[self.last_index()].distance_from_origin_km - origin;
        if total <= 0.0 {
            return index as f64 / self.last_index().max(1) as f64;
        }

        ((self.stops[index].distance_from_origin_km - origin) / total).clamp(0.0, 1.0)
    }
}

/// Seven stop route served by the demo feed.
#[must_use]
pub fn demo_route() -> RouteModel {
    let stops = vec![
        Stop::new("Campus Main Gate", 0, 0.0),
        Stop::new("Library Junction", 1, 1.4),
        Stop::new("Market Road", 2, 3.1),
        Stop::new("Bus Stand", 3, 4.8),
        Stop::new("Hospital Cross", 4, 6.2),
        Stop::new("Railway Station", 5, 8.5),
        Stop::new("Town Terminal", 6, 10.3),
    ];
    RouteModel { stops }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route() -> RouteModel {
        RouteModel::new(vec![Stop::new("A", 0, 0.0), Stop::new("B", 1, 2.0), Stop::new("C", 2, 8.0)])
            .expect("valid route")
    }

    #[test]
    fn next_stop_is_clamped() {
        let route = route();
        assert_eq!(route.next_stop_index(0), 1);
        assert_eq!(route.next_stop_index(1), 2);
        assert_eq!(route.next_stop_index(2), 2);
        assert_eq!(route.next_stop_index(usize::MAX), 2);
    }

    #[test]
    fn terminal_detection() {
        let route = route();
        assert!(!route.is_terminal(0));
        assert!(!route.is_terminal(1));
        assert!(route.is_terminal(2));
    }

    #[test]
    fn clamp_raw_index() {
        let route = route();
        assert_eq!(route.clamp_index(-3), 0);
        assert_eq!(route.clamp_index(1), 1);
        assert_eq!(route.clamp_index(42), 2);
    }

    #[test]
    fn distance_progress() {
        let route = route();
        assert!(route.progress_at(0).abs() < f64::EPSILON);
        assert!((route.progress_at(1) - 0.25).abs() < f64::EPSILON);
        assert!((route.progress_at(2) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn single_stop_route() {
        let route = RouteModel::new(vec![Stop::new("Only", 0, 0.0)]).expect("valid route");
        assert!(route.is_terminal(0));
        assert_eq!(route.next_stop_index(0), 0);
        assert!((route.progress_at(0) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_empty() {
        let err = RouteModel::new(vec![]).unwrap_err();
        assert_eq!(err.code(), "invalid_route");
    }

    #[test]
    fn rejects_out_of_order() {
        let err = RouteModel::new(vec![Stop::new("A", 0, 0.0), Stop::new("B", 1, 0.0)])
            .unwrap_err();
        assert_eq!(err.code(), "invalid_route");

        let err = RouteModel::new(vec![Stop::new("A", 1, 0.0), Stop::new("B", 1, 2.0)])
            .unwrap_err();
        assert_eq!(err.code(), "invalid_route");
    }

    #[test]
    fn rejects_non_finite_distance() {
        let err = RouteModel::new(vec![Stop::new("A", 0, 0.0), Stop::new("B", 1, f64::NAN)])
            .unwrap_err();
        assert_eq!(err.code(), "invalid_route");

        let err = RouteModel::new(vec![Stop::new("A", 0, f64::NAN), Stop::new("B", 1, 2.0)])
            .unwrap_err();
        assert_eq!(err.code(), "invalid_route");

        let err = RouteModel::new(vec![Stop::new("A", 0, 0.0), Stop::new("B", 1, f64::INFINITY)])
            .unwrap_err();
        assert_eq!(err.code(), "invalid_route");
    }

    #[test]
    fn demo_route_is_valid() {
        let demo = demo_route();
        assert_eq!(demo.len(), 7);
        assert!(RouteModel::new(demo.stops().to_vec()).is_ok());
    }
}
