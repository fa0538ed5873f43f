/// Start of the simulated route, near the campus main gate.
pub const DEMO_ORIGIN: (f64, f64) = (11.5412, 75.6231);

pub fn get_geocoder_url() -> String {
    std::env::var("GEOCODER_URL").unwrap_or_else(|_| {
        let default = "https://nominatim.openstreetmap.org".to_string();
        tracing::trace!("GEOCODER_URL not set, using default: {default}");
        default
    })
}

pub fn get_tracking_slot() -> usize {
    std::env::var("TRACKING_SLOT").ok().and_then(|slot| slot.trim().parse().ok()).unwrap_or_else(
        || {
            tracing::trace!("TRACKING_SLOT not set, tracking slot 0");
            0
        },
    )
}

pub fn get_demo_mode() -> bool {
    std::env::var("TRACKING_DEMO").map_or_else(
        |_| {
            tracing::trace!("TRACKING_DEMO not set, using live telemetry");
            false
        },
        |value| matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on"),
    )
}
