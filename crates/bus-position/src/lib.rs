//! # Bus Position
//!
//! Tracks a live bus: polls the telemetry API, reconciles noisy samples into
//! a stable position and stop progress, and publishes snapshots for display.

mod config;
mod geocode;
mod reconciler;
mod retry;
mod route;
mod scheduler;
mod simulator;
mod source;
mod telemetry;

pub mod provider;

pub use realtime::{Error, HttpRequest, Result};

pub use self::config::*;
pub use self::geocode::*;
pub use self::provider::{Geocoder, PositionFeed};
pub use self::reconciler::*;
pub use self::retry::*;
pub use self::route::*;
pub use self::scheduler::*;
pub use self::simulator::*;
pub use self::source::*;
pub use self::telemetry::*;
