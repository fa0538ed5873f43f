//! Telemetry source endpoint fallback against a mock upstream.


use std::sync::Arc;
use std::time::Duration;

use bus_position::{SourceConfig, TelemetrySource};
use pretty_assertions::assert_eq;
use tokio::time::Instant;

use self::provider::{MockProvider, Reply};

const BODY: &str = r#"[
    {
        "deviceId": 7,
        "name": "Bus 1",
        "latitude": 11.54,
        "longitude": 75.62,
        "valid": true,
        "speed": 12.0,
        "course": 90.0,
        "status": "online",
        "attributes": { "motion": true, "todayDistance": 5400.0 }
    },
    {
        "deviceId": 8,
        "name": "Bus 2",
        "latitude": 11.56,
        "longitude": 75.65,
        "valid": true,
        "status": "offline"
    }
]"#;

fn config() -> SourceConfig {
    SourceConfig {
        host: "gps.test".to_string(),
        port: 8082,
        path: "/api/positions".to_string(),
        username: "demo".to_string(),
        password: "secret".to_string(),
        ..SourceConfig::default()
    }
}

fn source(provider: &MockProvider) -> TelemetrySource<MockProvider> {
    TelemetrySource::new(Arc::new(provider.clone()), config())
}

#[tokio::test]
async fn third_candidate_wins() {
    let provider = MockProvider::new();
    let candidates = config().candidates();
    provider.reply(&candidates[1], Reply::Status(503, "maintenance".to_string()));
    provider.ok(&candidates[2], BODY);

    let samples = source(&provider).fetch_positions().await.expect("third endpoint answers");

    assert_eq!(samples.len(), 2);
    assert_eq!(samples[1].slot, 1);
    assert_eq!(samples[1].device_id.as_deref(), Some("8"));

    let tried: Vec<String> = provider.requests().into_iter().map(|r| r.uri).collect();
    assert_eq!(tried, candidates);
}

#[tokio::test]
async fn first_success_skips_the_rest() {
    let provider = MockProvider::new();
    let candidates = config().candidates();
    provider.ok(&candidates[0], BODY);
    provider.ok(&candidates[2], "[]");

    let samples = source(&provider).fetch_positions().await.expect("first endpoint answers");
    assert_eq!(samples.len(), 2);
    assert_eq!(provider.requests().len(), 1);
}

#[tokio::test]
async fn sends_basic_credentials() {
    let provider = MockProvider::new();
    let candidates = config().candidates();
    provider.ok(&candidates[0], BODY);

    source(&provider).fetch_positions().await.expect("should fetch");

    let request = &provider.requests()[0];
    assert_eq!(request.authorization.as_deref(), Some("Basic ZGVtbzpzZWNyZXQ="));
    assert!(request.uri.ends_with("?status=all&isAddressRequired=false&limit=100&offset=0"));
}

#[tokio::test]
async fn omits_credentials_without_username() {
    let provider = MockProvider::new();
    let config = SourceConfig { username: String::new(), ..config() };
    provider.ok(&config.candidates()[0], BODY);

    TelemetrySource::new(Arc::new(provider.clone()), config)
        .fetch_positions()
        .await
        .expect("should fetch");
    assert_eq!(provider.requests()[0].authorization, None);
}

#[tokio::test]
async fn rejected_everywhere() {
    let provider = MockProvider::new();
    for url in config().candidates() {
        provider.reply(&url, Reply::Status(401, "unauthorised".to_string()));
    }

    let err = source(&provider).fetch_positions().await.expect_err("all rejected");
    assert_eq!(err.code(), "all_endpoints_failed");
    assert!(err.is_transient());
}

#[tokio::test]
async fn malformed_body_wins_classification() {
    let provider = MockProvider::new();
    let candidates = config().candidates();
    provider.ok(&candidates[0], "<html>captive portal</html>");
    provider.reply(&candidates[1], Reply::Status(502, String::new()));

    let err = source(&provider).fetch_positions().await.expect_err("nothing parseable");
    assert_eq!(err.code(), "malformed_response");
    assert!(!err.is_transient());
    assert_eq!(provider.requests().len(), 3);
}

#[tokio::test]
async fn unreachable_everywhere() {
    let provider = MockProvider::new();

    let err = source(&provider).fetch_positions().await.expect_err("nothing reachable");
    assert_eq!(err.code(), "network_unavailable");
    assert!(err.to_string().contains("3 endpoints tried"));
}

#[tokio::test(start_paused = true)]
async fn slow_endpoints_time_out() {
    let provider = MockProvider::new();
    let candidates = config().candidates();
    provider.reply(&candidates[0], Reply::Hang);
    provider.reply(&candidates[1], Reply::Hang);
    provider.ok(&candidates[2], BODY);

    let started = Instant::now();
    let samples = source(&provider).fetch_positions().await.expect("third endpoint answers");

    assert_eq!(samples.len(), 2);
    assert_eq!(started.elapsed(), Duration::from_secs(10));
}

#[tokio::test]
async fn null_slots_are_skipped() {
    let provider = MockProvider::new();
    let candidates = config().candidates();
    provider.ok(&candidates[0], r#"[null, {"latitude": 11.5, "longitude": 75.6, "valid": true}]"#);

    let samples = source(&provider).fetch_positions().await.expect("should fetch");
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].slot, 1);
    assert_eq!(samples[0].index, 1);
}

#[tokio::test]
async fn mistyped_attribute_keeps_response() {
    let provider = MockProvider::new();
    let body = r#"[{
        "deviceId": 7,
        "latitude": 11.54,
        "longitude": 75.62,
        "valid": true,
        "attributes": { "motion": "true", "sat": "9", "stopIndex": "2" }
    }]"#;
    for url in config().candidates() {
        provider.ok(&url, body);
    }

    let samples = source(&provider).fetch_positions().await.expect("should fetch");
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].attributes.motion, Some(true));
    assert_eq!(samples[0].index, 2);
    assert_eq!(provider.requests().len(), 1);
}

#[cfg(feature = "insecure-relay")]
mod relay {
    use super::*;

    const RELAY: &str = "https://relay.test/raw?url=";

    fn relayed() -> SourceConfig {
        SourceConfig { relay_url: Some(RELAY.to_string()), ..config() }
    }

    #[tokio::test]
    async fn relay_tried_last() {
        let provider = MockProvider::new();
        let config = relayed();
        let candidates = config.candidates();
        provider.reply(&candidates[0], Reply::Status(503, String::new()));
        let relay_url = config.relay_candidate().expect("relay configured");
        provider.ok(&relay_url, BODY);

        let samples = TelemetrySource::new(Arc::new(provider.clone()), config)
            .fetch_positions()
            .await
            .expect("relay answers");

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].device_id.as_deref(), Some("7"));

        let tried: Vec<String> = provider.requests().into_iter().map(|r| r.uri).collect();
        let mut expected = candidates;
        expected.push(relay_url);
        assert_eq!(tried, expected);
    }

    #[tokio::test]
    async fn relay_failure_counts() {
        let provider = MockProvider::new();
        let config = relayed();
        let relay_url = config.relay_candidate().expect("relay configured");
        provider.reply(&relay_url, Reply::Status(502, String::new()));

        let err = TelemetrySource::new(Arc::new(provider.clone()), config)
            .fetch_positions()
            .await
            .expect_err("nothing answers");

        assert_eq!(err.code(), "all_endpoints_failed");
        assert!(err.to_string().contains("4 endpoints tried"));
        assert_eq!(provider.requests().len(), 4);
    }

    #[tokio::test]
    async fn no_relay_configured() {
        let provider = MockProvider::new();

        let err = source(&provider).fetch_positions().await.expect_err("nothing reachable");
        assert_eq!(err.code(), "network_unavailable");
        assert!(err.to_string().contains("3 endpoints tried"));
        assert_eq!(provider.requests().len(), 3);
    }
}
