//! Tracking service errors

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across the crate.
pub type Result<T> = anyhow::Result<T, Error>;

/// Domain level error type returned by the tracking pipeline.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Error {
    /// No endpoint could be reached (connection failure or timeout).
    #[error("code: network_unavailable, description: {0}")]
    NetworkUnavailable(String),

    /// At least one endpoint answered, but none with a success status.
    #[error("code: all_endpoints_failed, description: {0}")]
    AllEndpointsFailed(String),

    /// An endpoint answered successfully with a body that could not be parsed.
    #[error("code: malformed_response, description: {0}")]
    MalformedResponse(String),

    /// The sample carried no usable fix (invalid flag or zero coordinates).
    #[error("code: invalid_sample, description: {0}")]
    InvalidSample(String),

    /// The retry budget was spent without a successful fetch.
    #[error("code: retries_exhausted, description: {0}")]
    RetriesExhausted(String),

    /// Reverse geocoding failed. Never surfaced to users.
    #[error("code: geocode_failed, description: {0}")]
    GeocodeFailed(String),

    /// The route definition is empty or out of order.
    #[error("code: invalid_route, description: {0}")]
    InvalidRoute(String),

    /// The owning session was torn down before the operation completed.
    #[error("code: cancelled")]
    Cancelled,

    /// A non recoverable internal error occurred.
    #[error("code: server_error, description: {0}")]
    ServerError(String),
}

impl Error {
    /// Returns the stable error code associated with the variant.
    #[must_use]
    pub const fn code(&self) -> &str {
        match self {
            Self::NetworkUnavailable(_) => "network_unavailable",
            Self::AllEndpointsFailed(_) => "all_endpoints_failed",
            Self::MalformedResponse(_) => "malformed_response",
            Self::InvalidSample(_) => "invalid_sample",
            Self::RetriesExhausted(_) => "retries_exhausted",
            Self::GeocodeFailed(_) => "geocode_failed",
            Self::InvalidRoute(_) => "invalid_route",
            Self::Cancelled => "cancelled",
            Self::ServerError(_) => "server_error",
        }
    }

    /// Returns the error description.
    #[must_use]
    pub fn description(&self) -> String {
        self.to_string()
    }

    /// Failures that may clear up on their own if the request is repeated.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::NetworkUnavailable(_) | Self::AllEndpointsFailed(_))
    }

    /// Only an exhausted retry budget is shown to the user (as a banner).
    #[must_use]
    pub const fn is_user_visible(&self) -> bool {
        matches!(self, Self::RetriesExhausted(_))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        // if type is Error, return it with the newly added context
        if let Some(inner) = err.downcast_ref::<Self>() {
            tracing::debug!("Error: {err}, caused by: {inner}");

            return match inner {
                Self::NetworkUnavailable(e) => Self::NetworkUnavailable(format!("{err}: {e}")),
                Self::AllEndpointsFailed(e) => Self::AllEndpointsFailed(format!("{err}: {e}")),
                Self::MalformedResponse(e) => Self::MalformedResponse(format!("{err}: {e}")),
                Self::InvalidSample(e) => Self::InvalidSample(format!("{err}: {e}")),
                Self::RetriesExhausted(e) => Self::RetriesExhausted(format!("{err}: {e}")),
                Self::GeocodeFailed(e) => Self::GeocodeFailed(format!("{err}: {e}")),
                Self::InvalidRoute(e) => Self::InvalidRoute(format!("{err}: {e}")),
                Self::ServerError(e) => Self::ServerError(format!("{err}: {e}")),
                Self::Cancelled => Self::Cancelled,
            };
        }

        // otherwise, return a server error carrying the whole chain
        let chain = err.chain().map(ToString::to_string).collect::<Vec<_>>().join(" -> ");
        Self::ServerError(chain)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedResponse(err.to_string())
    }
}

#[macro_export]
macro_rules! network_unavailable {
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::NetworkUnavailable(format!($fmt, $($arg)*))
    };
     ($err:expr $(,)?) => {
        $crate::Error::NetworkUnavailable(format!($err))
    };
}

#[macro_export]
macro_rules! malformed_response {
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::MalformedResponse(format!($fmt, $($arg)*))
    };
     ($err:expr $(,)?) => {
        $crate::Error::MalformedResponse(format!($err))
    };
}

#[macro_export]
macro_rules! invalid_sample {
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::InvalidSample(format!($fmt, $($arg)*))
    };
     ($err:expr $(,)?) => {
        $crate::Error::InvalidSample(format!($err))
    };
}

#[cfg(test)]
mod tests {
    use anyhow::{Context, Result, anyhow};
    use serde_json::Value;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, Registry, fmt};

    use super::Error;

    #[test]
    fn error_display() {
        let err = Error::NetworkUnavailable("connection refused".to_string());
        assert_eq!(format!("{err}",), "code: network_unavailable, description: connection refused");
        assert_eq!(err.code(), "network_unavailable");
    }

    #[test]
    fn with_context() {
        Registry::default().with(EnvFilter::new("debug")).with(fmt::layer()).init();

        let context_error = || -> Result<(), Error> {
            Err(Error::AllEndpointsFailed("HTTP 503".to_string()))
                .context("fetching positions")
                .context("polling slot 2")?;
            Ok(())
        };

        let result = context_error();
        assert_eq!(
            result.unwrap_err(),
            Error::AllEndpointsFailed("polling slot 2: HTTP 503".to_string())
        );
    }

    #[test]
    fn retries_context() {
        let result = Err::<(), Error>(Error::RetriesExhausted("5 attempts".to_string()))
            .context("request context");
        let err: Error = result.unwrap_err().into();

        assert_eq!(
            err.to_string(),
            "code: retries_exhausted, description: request context: 5 attempts"
        );
        assert!(err.is_user_visible());
    }

    #[test]
    fn anyhow_context() {
        let result = Err::<(), anyhow::Error>(anyhow!("one-off error")).context("error context");
        let err: Error = result.unwrap_err().into();

        assert_eq!(err.to_string(), "code: server_error, description: error context -> one-off error");
    }

    #[test]
    fn serde_error() {
        let result: Result<Value, serde_json::Error> = serde_json::from_str(r#"{"foo": "bar""#);
        let err: Error = result.unwrap_err().into();

        assert_eq!(
            err.to_string(),
            "code: malformed_response, description: EOF while parsing an object at line 1 column 13"
        );
        assert!(!err.is_transient());
    }

    #[test]
    fn transient_classes() {
        assert!(Error::NetworkUnavailable(String::new()).is_transient());
        assert!(Error::AllEndpointsFailed(String::new()).is_transient());
        assert!(!Error::GeocodeFailed(String::new()).is_transient());
        assert!(!Error::InvalidSample(String::new()).is_user_visible());
    }

    #[test]
    fn macros() {
        let err = crate::malformed_response!("expected array, got {}", "object");
        assert_eq!(err, Error::MalformedResponse("expected array, got object".to_string()));
    }
}
