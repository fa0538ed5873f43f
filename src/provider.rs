use std::any::Any;
use std::error::Error;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use bytes::Bytes;
use http::{Request, Response};
use http_body::Body;
use http_body_util::BodyExt;
use realtime::HttpRequest;

/// Overall cap per request; callers layer tighter per-attempt timeouts.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Outbound HTTP over a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct Provider {
    client: reqwest::Client,
}

impl Provider {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }
}

impl HttpRequest for Provider {
    async fn fetch<T>(&self, request: Request<T>) -> Result<Response<Bytes>>
    where
        T: Body + Any + Send,
        T::Data: Into<Vec<u8>> + Send,
        T::Error: Into<Box<dyn Error + Send + Sync + 'static>>,
    {
        let (parts, body) = request.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                let err: Box<dyn Error + Send + Sync> = e.into();
                return Err(anyhow!("failed to read request body: {err}"));
            }
        };

        tracing::debug!(method = %parts.method, uri = %parts.uri, "outbound request");
        let response = self
            .client
            .request(parts.method, parts.uri.to_string())
            .headers(parts.headers)
            .body(body)
            .send()
            .await
            .with_context(|| format!("request to {} failed", parts.uri))?;

        let mut builder = Response::builder().status(response.status());
        for (name, value) in response.headers() {
            builder = builder.header(name, value);
        }
        let body = response.bytes().await.context("failed to read response body")?;
        builder.body(body).context("failed to build response")
    }
}
