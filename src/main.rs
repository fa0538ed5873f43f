//! # Bus Tracker
//!
//! Tracks one bus slot from the live telemetry API (or the simulated demo
//! route) and logs every snapshot until interrupted.

mod config;
mod provider;

use std::sync::Arc;

use anyhow::{Context, Result};
use bus_position::{
    Geocoder, HttpGeocoder, PollingScheduler, PositionFeed, RouteModel, SimulatedFeed,
    SourceConfig, TelemetrySource, TrackingConfig, TrackingSnapshot, TrackingTarget, demo_route,
};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt};

use crate::provider::Provider;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    Registry::default().with(filter).with(fmt::layer()).init();

    let route = Arc::new(demo_route());
    let tracking = TrackingConfig::from_env();
    let target = TrackingTarget { slot: config::get_tracking_slot() };

    let provider = Arc::new(Provider::new()?);
    let geocoder = Arc::new(HttpGeocoder::new(Arc::clone(&provider), config::get_geocoder_url()));

    if config::get_demo_mode() {
        let (latitude, longitude) = config::DEMO_ORIGIN;
        let feed = Arc::new(SimulatedFeed::new(Arc::clone(&route), target.slot, latitude, longitude));
        let interval = tracking.demo_interval;
        let scheduler = PollingScheduler::new(feed, Arc::clone(&route), tracking)
            .with_geocoder(geocoder)
            .with_interval(interval);
        info!(slot = target.slot, "tracking simulated bus");
        run(scheduler, target, &route).await
    } else {
        let source = SourceConfig::from_env();
        info!(slot = target.slot, host = %source.host, "tracking live bus");
        let feed = Arc::new(TelemetrySource::new(provider, source));
        let scheduler =
            PollingScheduler::new(feed, Arc::clone(&route), tracking).with_geocoder(geocoder);
        run(scheduler, target, &route).await
    }
}

async fn run<F, G>(
    mut scheduler: PollingScheduler<F, G>, target: TrackingTarget, route: &RouteModel,
) -> Result<()>
where
    F: PositionFeed + 'static,
    G: Geocoder + 'static,
{
    let mut snapshots = scheduler.subscribe();
    scheduler.start(target)?;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                report(&snapshot, route);
            }
        }
    }

    scheduler.stop();
    Ok(())
}

fn report(snapshot: &TrackingSnapshot, route: &RouteModel) {
    if let Some(banner) = &snapshot.banner {
        warn!(epoch = snapshot.epoch, "{banner}");
    }

    let Some(position) = &snapshot.position else {
        info!(epoch = snapshot.epoch, status = snapshot.connection_status.label(), "waiting for fix");
        return;
    };

    let stop = route.stop(position.current_stop_index).map_or("N/A", |stop| stop.name.as_str());
    let next = route
        .stop(route.next_stop_index(position.current_stop_index))
        .map_or("N/A", |stop| stop.name.as_str());

    info!(
        epoch = snapshot.epoch,
        status = snapshot.connection_status.label(),
        latitude = position.latitude,
        longitude = position.longitude,
        stop,
        next,
        progress = %format!("{:.0}%", position.progress_fraction * 100.0),
        speed_kmh = %format!("{:.1}", position.speed_kmh),
        motion = position.motion_label(),
        today = %position.today_distance_label(),
        place = position.place_label(),
        synthetic = position.synthetic,
        trail = snapshot.history.len(),
        "bus position"
    );
}
