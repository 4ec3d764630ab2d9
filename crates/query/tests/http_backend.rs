use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use scry_core::config::Config;
use scry_query::http::ExplainSink;
use scry_query::{Backend, HttpBackend, QueryWindow};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(url: &str) -> Config {
    Config {
        url: url.to_string(),
        token: Some("xat-secret".into()),
        org_id: Some("acme".into()),
        ..Config::default()
    }
}

fn window() -> QueryWindow {
    QueryWindow {
        start: Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap(),
        end: Utc.with_ymd_and_hms(2026, 2, 1, 1, 0, 0).unwrap(),
    }
}

#[tokio::test]
async fn requests_carry_token_and_org() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/datasets"))
        .and(header("authorization", "Bearer xat-secret"))
        .and(header("x-org-id", "acme"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"name": "otel-traces", "region": "eu"},
            {"name": "otel-logs"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let backend = HttpBackend::new(&config(&server.uri()), None).unwrap();
    let datasets = backend.list_datasets().await.unwrap();
    assert_eq!(datasets.len(), 2);
    assert_eq!(datasets[0].region, "eu");
    assert_eq!(datasets[1].region, "default");
}

#[tokio::test]
async fn query_posts_window_and_flattens_matches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/datasets/_apl"))
        .and(query_param("format", "legacy"))
        .and(body_partial_json(json!({
            "apl": "['otel-logs'] | take 1",
            "startTime": "2026-02-01T00:00:00Z",
            "endTime": "2026-02-01T01:00:00Z"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "matches": [{"_time": "2026-02-01T00:30:00Z", "data": {"body": "hello"}}]
        })))
        .mount(&server)
        .await;

    let backend = HttpBackend::new(&config(&server.uri()), None).unwrap();
    let rows = backend
        .run_query("default", &[], "['otel-logs'] | take 1", &window())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["_time"], json!("2026-02-01T00:30:00Z"));
    assert_eq!(rows[0]["body"], json!("hello"));
}

#[tokio::test]
async fn queries_for_a_region_go_to_its_configured_url() {
    let home = MockServer::start().await;
    let eu = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/datasets/_apl"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"from": "eu"}])))
        .expect(1)
        .mount(&eu)
        .await;

    let mut cfg = config(&home.uri());
    cfg.regions = BTreeMap::from([("eu".to_string(), eu.uri())]);
    let backend = HttpBackend::new(&cfg, None).unwrap();

    let rows = backend
        .run_query("eu", &["otel-traces".to_string()], "q", &window())
        .await
        .unwrap();
    assert_eq!(rows[0]["from"], json!("eu"));
    assert!(home.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn error_statuses_map_to_backend_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/datasets/missing/fields"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "dataset not found"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/datasets/_apl"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "invalid token"})))
        .mount(&server)
        .await;

    let backend = HttpBackend::new(&config(&server.uri()), None).unwrap();

    let err = backend.dataset_fields("missing").await.unwrap_err();
    assert_eq!(err.exit_code(), 5);
    assert!(err.to_string().contains("dataset not found"));

    let err = backend
        .run_query("default", &[], "q", &window())
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 5);
    assert!(err.to_string().contains("check SCRY_TOKEN"));
}

#[tokio::test]
async fn non_json_body_is_a_backend_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/datasets"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let backend = HttpBackend::new(&config(&server.uri()), None).unwrap();
    let err = backend.list_datasets().await.unwrap_err();
    assert!(err.to_string().contains("invalid JSON response"));
    assert_eq!(err.exit_code(), 5);
}

#[tokio::test]
async fn explain_sink_sees_request_and_query() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/datasets/_apl"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink_lines = Arc::clone(&lines);
    let sink: ExplainSink = Arc::new(move |line: String| sink_lines.lock().unwrap().push(line));
    let backend = HttpBackend::new(&config(&server.uri()), Some(sink)).unwrap();

    backend
        .run_query("default", &["otel-logs".to_string()], "['otel-logs'] | count", &window())
        .await
        .unwrap();

    let lines = lines.lock().unwrap();
    assert_eq!(lines[0], "query [default] otel-logs:\n['otel-logs'] | count");
    assert!(lines[1].starts_with("POST http://"));
    assert!(lines[1].ends_with("/v1/datasets/_apl?format=legacy"));
}
