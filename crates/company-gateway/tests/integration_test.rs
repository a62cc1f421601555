// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod common;

use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use common::{test_config, CaptureMetrics, MockResponse, MockUpstream, TestGateway};
use company_gateway::backend::BackendTarget;
use company_gateway::cache::Cache;

async fn get(url: &str) -> (u16, String) {
    let response = reqwest::get(url).await.expect("request failed");
    let status = response.status().as_u16();
    let body = response.text().await.expect("failed to read body");
    (status, body)
}

#[tokio::test]
async fn test_status_endpoint() {
    let gateway = TestGateway::start(test_config()).await;
    let (status, body) = get(&gateway.url("/status")).await;
    assert_eq!(status, 200);
    assert_eq!(body, "Frontend Server is running");
}

#[tokio::test]
async fn test_unknown_path_returns_404() {
    let gateway = TestGateway::start(test_config()).await;
    let (status, body) = get(&gateway.url("/nope")).await;
    assert_eq!(status, 404);
    assert_eq!(body, "Not Found");
}

#[tokio::test]
async fn test_missing_parameters_return_400() {
    let gateway = TestGateway::start(test_config()).await;

    for path in [
        "/company",
        "/company?id=123",
        "/company?country_iso=US",
        "/company?id=&country_iso=US",
        "/company?id=123&country_iso=",
    ] {
        let (status, body) = get(&gateway.url(path)).await;
        assert_eq!(status, 400, "for path {path}");
        assert_eq!(body, r#"{"error":"Missing required parameters"}"#);
    }
}

#[tokio::test]
async fn test_v2_company_is_normalized() {
    let upstream =
        MockUpstream::start(|_| MockResponse::company_v2(r#"{"company_name":"FakeCo V2"}"#)).await;
    let mut config = test_config();
    config
        .country_backend_map
        .insert("US".to_string(), upstream.target());
    let gateway = TestGateway::start(config).await;

    let (status, body) = get(&gateway.url("/company?id=123&country_iso=US")).await;
    assert_eq!(status, 200);

    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(
        body,
        json!({"active": true, "name": "FakeCo V2", "id": "123"})
    );
    assert_eq!(upstream.requests.lock().unwrap().as_slice(), ["/companies/123"]);
}

#[tokio::test]
async fn test_v1_company_closed_in_past() {
    let upstream = MockUpstream::start(|_| {
        MockResponse::company_v1(r#"{"cn":"FakeCo V1","closed_on":"2024-01-01T00:00:00Z"}"#)
    })
    .await;
    let mut config = test_config();
    config
        .country_backend_map
        .insert("DE".to_string(), upstream.target());
    let gateway = TestGateway::start(config).await;

    let (status, body) = get(&gateway.url("/company?id=456&country_iso=DE")).await;
    assert_eq!(status, 200);

    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(
        body,
        json!({
            "active": false,
            "name": "FakeCo V1",
            "id": "456",
            "active_until": "2024-01-01T00:00:00Z"
        })
    );
}

#[tokio::test]
async fn test_lowercase_country_is_uppercased_for_routing() {
    let upstream =
        MockUpstream::start(|_| MockResponse::company_v2(r#"{"company_name":"FakeCo"}"#)).await;
    let mut config = test_config();
    config
        .country_backend_map
        .insert("US".to_string(), upstream.target());
    let gateway = TestGateway::start(config).await;

    let (status, _) = get(&gateway.url("/company?id=1&country_iso=us")).await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn test_upstream_404_passes_through() {
    let upstream = MockUpstream::start(|_| MockResponse::status(404)).await;
    let mut config = test_config();
    config
        .country_backend_map
        .insert("US".to_string(), upstream.target());
    let gateway = TestGateway::start(config).await;

    let (status, body) = get(&gateway.url("/company?id=notfound&country_iso=US")).await;
    assert_eq!(status, 404);
    assert_eq!(body, r#"{"error":"Not Found"}"#);
}

#[tokio::test]
async fn test_unconfigured_country_returns_404() {
    let gateway = TestGateway::start(test_config()).await;
    let (status, body) = get(&gateway.url("/company?id=x&country_iso=XX")).await;
    assert_eq!(status, 404);
    assert_eq!(body, r#"{"error":"Unconfigured country_iso"}"#);
}

#[tokio::test]
async fn test_preseeded_cache_short_circuits_upstream() {
    let upstream =
        MockUpstream::start(|_| MockResponse::company_v2(r#"{"company_name":"Fresh"}"#)).await;
    let mut config = test_config();
    config
        .country_backend_map
        .insert("US".to_string(), upstream.target());
    let gateway = TestGateway::start(config).await;

    let cached = r#"{"id":"123","name":"CachedCo"}"#;
    gateway
        .cache
        .set("123:US", cached, Duration::from_secs(60))
        .await;

    let (status, body) = get(&gateway.url("/company?id=123&country_iso=US")).await;
    assert_eq!(status, 200);
    assert_eq!(body, cached);
    assert_eq!(upstream.request_count(), 0);
}

#[tokio::test]
async fn test_second_request_is_served_from_cache() {
    let upstream = MockUpstream::start(|_| {
        MockResponse::company_v1(r#"{"cn":"X","created_on":"2001-02-03T04:05:06Z"}"#)
    })
    .await;
    let mut config = test_config();
    config
        .country_backend_map
        .insert("US".to_string(), upstream.target());
    let gateway = TestGateway::start(config).await;

    let (first_status, first_body) = get(&gateway.url("/company?id=77&country_iso=US")).await;
    let (second_status, second_body) = get(&gateway.url("/company?id=77&country_iso=US")).await;

    assert_eq!(first_status, 200);
    assert_eq!(second_status, 200);
    assert_eq!(first_body, second_body);
    assert_eq!(upstream.request_count(), 1);
}

#[tokio::test]
async fn test_tripped_breaker_short_circuits_upstream() {
    let upstream =
        MockUpstream::start(|_| MockResponse::company_v2(r#"{"company_name":"FakeCo"}"#)).await;
    let mut config = test_config();
    config
        .country_backend_map
        .insert("US".to_string(), upstream.target());
    let gateway = TestGateway::start(config).await;

    gateway
        .gateway
        .circuit_breaker()
        .trip(&upstream.url(), Duration::from_secs(60))
        .await;

    let (status, body) = get(&gateway.url("/company?id=x&country_iso=US")).await;
    assert_eq!(status, 504);
    assert_eq!(body, r#"{"error":"Gateway Timeout"}"#);
    assert_eq!(upstream.request_count(), 0);
}

#[tokio::test]
async fn test_upstream_5xx_returns_502_and_trips_breaker() {
    let upstream = MockUpstream::start(|_| MockResponse::status(500)).await;
    let mut config = test_config();
    config
        .country_backend_map
        .insert("US".to_string(), upstream.target());
    let gateway = TestGateway::start(config).await;

    let (status, body) = get(&gateway.url("/company?id=1&country_iso=US")).await;
    assert_eq!(status, 502);
    assert_eq!(body, r#"{"error":"Bad Gateway"}"#);

    // Still inside the cooldown window: short-circuited without another
    // upstream call.
    let (status, body) = get(&gateway.url("/company?id=1&country_iso=US")).await;
    assert_eq!(status, 504);
    assert_eq!(body, r#"{"error":"Gateway Timeout"}"#);
    assert_eq!(upstream.request_count(), 1);
}

#[tokio::test]
async fn test_unknown_content_type_returns_502_and_counts_json_error() {
    let upstream = MockUpstream::start(|_| MockResponse {
        status: 200,
        content_type: Some("application/json".to_string()),
        body: r#"{"company_name":"X"}"#.to_string(),
    })
    .await;
    let mut config = test_config();
    config
        .country_backend_map
        .insert("US".to_string(), upstream.target());
    let metrics = CaptureMetrics::new();
    let gateway = TestGateway::start_with_metrics(config, metrics.clone()).await;

    let (status, body) = get(&gateway.url("/company?id=1&country_iso=US")).await;
    assert_eq!(status, 502);
    assert_eq!(body, r#"{"error":"Bad Gateway"}"#);
    assert!(metrics.lines().contains(&"metric.2:1|c".to_string()));
}

#[tokio::test]
async fn test_malformed_json_returns_502() {
    let upstream = MockUpstream::start(|_| MockResponse {
        status: 200,
        content_type: Some("application/x-company-v1".to_string()),
        body: "definitely not json".to_string(),
    })
    .await;
    let mut config = test_config();
    config
        .country_backend_map
        .insert("US".to_string(), upstream.target());
    let gateway = TestGateway::start(config).await;

    let (status, body) = get(&gateway.url("/company?id=1&country_iso=US")).await;
    assert_eq!(status, 502);
    assert_eq!(body, r#"{"error":"Bad Gateway"}"#);
}

#[tokio::test]
async fn test_unexpected_status_returns_502() {
    let upstream = MockUpstream::start(|_| MockResponse::status(302)).await;
    let mut config = test_config();
    config
        .country_backend_map
        .insert("US".to_string(), upstream.target());
    let gateway = TestGateway::start(config).await;

    let (status, body) = get(&gateway.url("/company?id=1&country_iso=US")).await;
    assert_eq!(status, 502);
    assert_eq!(body, r#"{"error":"Bad Gateway"}"#);
}

#[tokio::test]
async fn test_unreachable_upstream_returns_504_and_trips_breaker() {
    // Bind then drop so nothing is listening.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let target = BackendTarget::parse(&format!("http://127.0.0.1:{port}")).unwrap();
    let target_url = target.url.clone();

    let mut config = test_config();
    config.country_backend_map.insert("US".to_string(), target);
    let gateway = TestGateway::start(config).await;

    let (status, body) = get(&gateway.url("/company?id=1&country_iso=US")).await;
    assert_eq!(status, 504);
    assert_eq!(body, r#"{"error":"Gateway Timeout"}"#);
    assert!(gateway.gateway.circuit_breaker().is_tripped(&target_url).await);
}

#[tokio::test]
async fn test_keep_alive_pipelined_requests_answered_in_order() {
    let gateway = TestGateway::start(test_config()).await;

    let mut stream = TcpStream::connect(gateway.addr).await.unwrap();
    stream
        .write_all(
            b"GET /status HTTP/1.1\r\nHost: gateway\r\n\r\n\
              GET /nope HTTP/1.1\r\nHost: gateway\r\nConnection: close\r\n\r\n",
        )
        .await
        .unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let raw = String::from_utf8(raw).unwrap();

    let first = raw.find("HTTP/1.1 200 OK").expect("missing first response");
    let second = raw.find("HTTP/1.1 404 Not Found").expect("missing second response");
    assert!(first < second, "responses out of order: {raw}");
}

#[tokio::test]
async fn test_sla_exceeded_returns_504_when_not_dropping() {
    let upstream =
        MockUpstream::start(|_| MockResponse::company_v2(r#"{"company_name":"X"}"#)).await;
    let mut config = test_config();
    config
        .country_backend_map
        .insert("US".to_string(), upstream.target());
    config.server_sla = Duration::ZERO;
    config.average_processing_time = Duration::ZERO;
    config.drop_sla_timeout_requests = false;

    let metrics = CaptureMetrics::new();
    let gateway = TestGateway::start_with_metrics(config, metrics.clone()).await;

    let (status, body) = get(&gateway.url("/company?id=1&country_iso=US")).await;
    assert_eq!(status, 504);
    assert_eq!(body, r#"{"error":"Gateway Timeout"}"#);
    assert_eq!(upstream.request_count(), 0);
    assert!(metrics.lines().contains(&"metric.5:1|c".to_string()));
}

#[tokio::test]
async fn test_sla_exceeded_drops_request_and_keeps_connection() {
    let mut config = test_config();
    config.server_sla = Duration::ZERO;
    config.average_processing_time = Duration::ZERO;
    config.drop_sla_timeout_requests = true;
    let gateway = TestGateway::start(config).await;

    let mut stream = TcpStream::connect(gateway.addr).await.unwrap();
    // The /company request is shed without any response; the connection must
    // keep serving and answer /status.
    stream
        .write_all(
            b"GET /company?id=1&country_iso=US HTTP/1.1\r\nHost: gateway\r\n\r\n\
              GET /status HTTP/1.1\r\nHost: gateway\r\nConnection: close\r\n\r\n",
        )
        .await
        .unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let raw = String::from_utf8(raw).unwrap();

    assert_eq!(raw.matches("HTTP/1.1").count(), 1, "expected exactly one response: {raw}");
    assert!(raw.contains("Frontend Server is running"));
}

#[tokio::test]
async fn test_shutdown_stops_accepting_connections() {
    let gateway = TestGateway::start(test_config()).await;

    // Healthy before shutdown.
    let (status, _) = get(&gateway.url("/status")).await;
    assert_eq!(status, 200);

    gateway.shutdown.cancel();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(500))
        .build()
        .unwrap();
    let result = client.get(gateway.url("/status")).send().await;
    assert!(result.is_err(), "server still serving after shutdown");
}
