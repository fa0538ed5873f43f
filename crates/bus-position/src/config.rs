use std::env;
use std::time::Duration;

use crate::retry::{DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY, RetryPolicy};

/// Default live polling interval.
pub const LIVE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default polling interval for the simulated route.
pub const DEMO_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of trail points kept.
pub const HISTORY_CAPACITY: usize = 100;

/// Session behaviour: timing, retry budget, trail length and fallbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingConfig {
    pub poll_interval: Duration,
    pub demo_interval: Duration,
    pub retry: RetryPolicy,
    pub history_capacity: usize,
    pub geocode_enabled: bool,
    pub geocode_timeout: Duration,

    /// Placeholder shown when no real fix was ever received and retries are
    /// exhausted. Debug aid; `None` disables it.
    pub synthetic_fallback: Option<(f64, f64)>,
}

impl TrackingConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let poll_interval =
            Duration::from_secs(env_u64("TRACKING_POLL_INTERVAL_SECS", LIVE_POLL_INTERVAL.as_secs()));
        let demo_interval =
            Duration::from_secs(env_u64("TRACKING_DEMO_INTERVAL_SECS", DEMO_POLL_INTERVAL.as_secs()));
        let retry = RetryPolicy {
            max_attempts: u32::try_from(env_u64("TRACKING_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS.into()))
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
            base_delay: Duration::from_millis(env_u64(
                "TRACKING_BASE_DELAY_MS",
                duration_millis(DEFAULT_BASE_DELAY),
            )),
            max_delay: Duration::from_millis(env_u64(
                "TRACKING_MAX_DELAY_MS",
                duration_millis(DEFAULT_MAX_DELAY),
            )),
        };
        let history_capacity = usize::try_from(env_u64("TRACKING_HISTORY_CAPACITY", 100))
            .unwrap_or(HISTORY_CAPACITY)
            .max(1);
        let geocode_enabled = env_bool("TRACKING_GEOCODE_ENABLED", true);
        let geocode_timeout = Duration::from_secs(env_u64("TRACKING_GEOCODE_TIMEOUT_SECS", 5));
        let synthetic_fallback = env_bool("TRACKING_SYNTHETIC_FALLBACK", false).then(|| {
            (env_f64("TRACKING_SYNTHETIC_LAT", 11.5412), env_f64("TRACKING_SYNTHETIC_LON", 75.6231))
        });

        Self {
            poll_interval,
            demo_interval,
            retry,
            history_capacity,
            geocode_enabled,
            geocode_timeout,
            synthetic_fallback,
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            poll_interval: LIVE_POLL_INTERVAL,
            demo_interval: DEMO_POLL_INTERVAL,
            retry: RetryPolicy::default(),
            history_capacity: HISTORY_CAPACITY,
            geocode_enabled: true,
            geocode_timeout: Duration::from_secs(5),
            synthetic_fallback: None,
        }
    }
}

/// Query parameters sent with every positions request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionQuery {
    pub status: String,
    pub is_address_required: bool,
    pub limit: u32,
    pub offset: u32,
}

impl Default for PositionQuery {
    fn default() -> Self {
        Self { status: "all".to_string(), is_address_required: false, limit: 100, offset: 0 }
    }
}

impl PositionQuery {
    #[must_use]
    pub fn to_query(&self) -> String {
        format!(
            "status={}&isAddressRequired={}&limit={}&offset={}",
            urlencoding::encode(&self.status),
            self.is_address_required,
            self.limit,
            self.offset
        )
    }
}

/// Upstream telemetry API location and credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub username: String,
    pub password: String,
    pub query: PositionQuery,
    pub attempt_timeout: Duration,

    /// Public relay used after every direct endpoint failed. Only honoured
    /// with the `insecure-relay` feature.
    pub relay_url: Option<String>,
}

impl SourceConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let query = PositionQuery {
            status: env::var("TELEMETRY_STATUS").unwrap_or(defaults.query.status),
            is_address_required: env_bool("TELEMETRY_ADDRESS_REQUIRED", false),
            limit: u32::try_from(env_u64("TELEMETRY_LIMIT", 100)).unwrap_or(100),
            offset: u32::try_from(env_u64("TELEMETRY_OFFSET", 0)).unwrap_or(0),
        };

        Self {
            host: env::var("TELEMETRY_HOST").unwrap_or(defaults.host),
            port: u16::try_from(env_u64("TELEMETRY_PORT", u64::from(defaults.port)))
                .unwrap_or(defaults.port),
            path: env::var("TELEMETRY_PATH").unwrap_or(defaults.path),
            username: env::var("TELEMETRY_USERNAME").unwrap_or_default(),
            password: env::var("TELEMETRY_PASSWORD").unwrap_or_default(),
            query,
            attempt_timeout: Duration::from_secs(env_u64("TELEMETRY_ATTEMPT_TIMEOUT_SECS", 5)),
            relay_url: env::var("TELEMETRY_RELAY_URL").ok().filter(|url| !url.trim().is_empty()),
        }
    }

    /// Ordered endpoint variants for the one logical service.
    #[must_use]
    pub fn candidates(&self) -> Vec<String> {
        let path = if self.path.starts_with('/') { self.path.clone() } else { format!("/{}", self.path) };
        let query = self.query.to_query();
        let host = &self.host;

        let variants = [
            format!("https://{host}{path}?{query}"),
            if self.port == 80 {
                format!("http://{host}{path}?{query}")
            } else {
                format!("http://{host}:{}{path}?{query}", self.port)
            },
            format!("http://{host}{path}?{query}"),
        ];

        let mut urls: Vec<String> = Vec::with_capacity(variants.len());
        for url in variants {
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
        urls
    }

    /// The first candidate routed through the relay, if one is configured.
    #[must_use]
    pub fn relay_candidate(&self) -> Option<String> {
        let relay = self.relay_url.as_ref()?;
        let target = self.candidates().into_iter().next()?;
        Some(format!("{relay}{}", urlencoding::encode(&target)))
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8082,
            path: "/api/positions".to_string(),
            username: String::new(),
            password: String::new(),
            query: PositionQuery::default(),
            attempt_timeout: Duration::from_secs(5),
            relay_url: None,
        }
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|value| value.trim().parse::<u64>().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key).ok().and_then(|value| value.trim().parse::<f64>().ok()).unwrap_or(default)
}
