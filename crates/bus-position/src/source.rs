//! Telemetry source
//!
//! Fetches vehicle positions from the upstream tracking API. One logical
//! service is reachable through a handful of protocol/port variants; each is
//! tried in order and the first good answer wins.

use std::sync::Arc;

use anyhow::Context;
use base64::prelude::{BASE64_STANDARD, Engine as _};
use bytes::Bytes;
use http::Method;
use http::header::{ACCEPT, AUTHORIZATION};
use http_body_util::Empty;
use realtime::{Error, HttpRequest, Result, network_unavailable};
use tracing::{debug, info};

use crate::config::SourceConfig;
use crate::provider::PositionFeed;
use crate::telemetry::{RawTelemetrySample, parse_positions};

/// Fetches raw positions with endpoint fallback. Holds no state between calls.
#[derive(Debug)]
pub struct TelemetrySource<P: HttpRequest> {
    provider: Arc<P>,
    config: SourceConfig,
}

impl<P: HttpRequest> TelemetrySource<P> {
    #[must_use]
    pub const fn new(provider: Arc<P>, config: SourceConfig) -> Self {
        Self { provider, config }
    }

    #[must_use]
    pub const fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Fetch every bus slot's latest sample.
    ///
    /// # Errors
    ///
    /// When every candidate fails, returns the most structural failure seen:
    /// `MalformedResponse`, then `AllEndpointsFailed`, then
    /// `NetworkUnavailable`.
    pub async fn fetch_positions(&self) -> Result<Vec<RawTelemetrySample>> {
        let mut failures = Failures::default();

        for url in self.config.candidates() {
            match self.attempt(&url).await {
                Ok(samples) => {
                    debug!(url = %url, slots = samples.len(), "positions fetched");
                    return Ok(samples);
                }
                Err(err) => {
                    debug!(url = %url, error = %err, "endpoint attempt failed");
                    failures.record(&err);
                }
            }
        }

        #[cfg(feature = "insecure-relay")]
        if let Some(url) = self.config.relay_candidate() {
            tracing::warn!(
                monotonic_counter.insecure_relay_used = 1,
                "all direct endpoints failed, trying public relay"
            );
            match self.attempt(&url).await {
                Ok(samples) => return Ok(samples),
                Err(err) => failures.record(&err),
            }
        }

        let err = failures.into_error();
        info!(monotonic_counter.telemetry_fetch_failed = 1, error = %err);
        Err(err)
    }

    async fn attempt(&self, url: &str) -> Result<Vec<RawTelemetrySample>> {
        let mut builder =
            http::Request::builder().method(Method::GET).uri(url).header(ACCEPT, "application/json");
        if let Some(credentials) = self.authorization() {
            builder = builder.header(AUTHORIZATION, credentials);
        }
        let request = builder.body(Empty::<Bytes>::new()).context("building positions request")?;

        let timeout = self.config.attempt_timeout;
        let response = match tokio::time::timeout(timeout, self.provider.fetch(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(network_unavailable!("{}: {:#}", url, e)),
            Err(_elapsed) => {
                return Err(network_unavailable!("{} timed out after {:?}", url, timeout));
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(Error::AllEndpointsFailed(format!("HTTP {status} from {url}")));
        }

        parse_positions(response.body())
    }

    fn authorization(&self) -> Option<String> {
        if self.config.username.is_empty() {
            return None;
        }
        let token = BASE64_STANDARD.encode(format!("{}:{}", self.config.username, self.config.password));
        Some(format!("Basic {token}"))
    }
}

impl<P: HttpRequest> PositionFeed for TelemetrySource<P> {
    async fn fetch_positions(&self) -> Result<Vec<RawTelemetrySample>> {
        Self::fetch_positions(self).await
    }
}

#[derive(Debug, Default)]
struct Failures {
    attempts: usize,
    malformed: Option<String>,
    rejected: Option<String>,
    unreachable: Option<String>,
}

impl Failures {
    fn record(&mut self, err: &Error) {
        self.attempts += 1;
        let detail = Some(err.to_string());
        match err {
            Error::MalformedResponse(_) => self.malformed = detail,
            Error::AllEndpointsFailed(_) => self.rejected = detail,
            _ => self.unreachable = detail,
        }
    }

    fn into_error(self) -> Error {
        let attempts = self.attempts;
        if let Some(last) = self.malformed {
            return Error::MalformedResponse(format!("{attempts} endpoints tried, last: {last}"));
        }
        if let Some(last) = self.rejected {
            return Error::AllEndpointsFailed(format!("{attempts} endpoints tried, last: {last}"));
        }
        let last = self.unreachable.unwrap_or_else(|| "no endpoints configured".to_string());
        Error::NetworkUnavailable(format!("{attempts} endpoints tried, last: {last}"))
    }
}
