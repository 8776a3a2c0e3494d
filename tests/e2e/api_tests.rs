//! HTTP API tests against the in-process router.

use super::{TestGateway, TEST_CSV};
use axum::http::StatusCode;
use bytes::Bytes;
use psq_gateway::{GatewayConfig, JobStatus, Secret};
use serde_json::{json, Value};
use std::time::Duration;

const SETTLE: Duration = Duration::from_secs(5);

fn sample_body() -> Value {
    json!({
        "domain": "node.example.com",
        "date": "2024-06-01",
        "payorAddress": "pokt1payor",
    })
}

#[tokio::test]
async fn test_full_report_flow() {
    let harness = TestGateway::start();
    let server = harness.server();

    let response = server.post("/requests").json(&sample_body()).await;
    response.assert_status_ok();
    let body: Value = response.json();
    let secret = Secret::from(body["secret"].as_str().expect("secret string"));
    assert!(body["message"]
        .as_str()
        .expect("message")
        .contains("20000000upokt"));
    assert_eq!(
        body["statusUrl"],
        format!("/requests/{}/status", secret.as_str())
    );

    harness.oracle.pay(&secret);
    harness
        .wait_for_status(&secret, JobStatus::Completed, SETTLE)
        .await;

    let response = server
        .get(&format!("/requests/{}/status", secret.as_str()))
        .await;
    response.assert_status_ok();
    assert_eq!(response.header("content-type"), "text/csv");
    assert_eq!(
        response.header("content-disposition"),
        "attachment; filename=\"psq-node.example.com-2024-06-01.csv\""
    );
    assert_eq!(response.text(), TEST_CSV);
}

#[tokio::test]
async fn test_pending_job_reports_progress() {
    let harness = TestGateway::start();
    let server = harness.server();

    let body: Value = server.post("/requests").json(&sample_body()).await.json();
    let secret = body["secret"].as_str().expect("secret string").to_string();

    let response = server.get(&format!("/requests/{secret}/status")).await;
    response.assert_status(StatusCode::ACCEPTED);
    let body: Value = response.json();
    assert_eq!(body["status"], "pending");
    assert_eq!(body["message"], "Waiting for payment verification");
}

#[tokio::test]
async fn test_verified_job_reports_progress() {
    let harness = TestGateway::start();
    harness.executor.hold();
    let server = harness.server();

    let secret = harness.create_sample_job().await;
    harness.oracle.pay(&secret);
    harness
        .wait_for_status(&secret, JobStatus::Verified, SETTLE)
        .await;

    let response = server
        .get(&format!("/requests/{}/status", secret.as_str()))
        .await;
    response.assert_status(StatusCode::ACCEPTED);
    let body: Value = response.json();
    assert_eq!(body["status"], "verified");
    assert_eq!(body["message"], "Payment verified, executing query");

    harness.executor.release();
    harness
        .wait_for_status(&secret, JobStatus::Completed, SETTLE)
        .await;
}

#[tokio::test]
async fn test_failed_job_returns_reason() {
    let harness = TestGateway::start();
    harness.executor.fail_with("bq exited with exit status: 1");
    let server = harness.server();

    let secret = harness.create_sample_job().await;
    harness.oracle.pay(&secret);
    harness
        .wait_for_status(&secret, JobStatus::Failed, SETTLE)
        .await;

    let response = server
        .get(&format!("/requests/{}/status", secret.as_str()))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(
        body["error"],
        "Report generation failed: bq exited with exit status: 1"
    );
}

#[tokio::test]
async fn test_unknown_secret_is_not_found() {
    let harness = TestGateway::start();
    let server = harness.server();

    let response = server.get("/requests/0123456789abcdef/status").await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["error"], "Query not found");
}

#[tokio::test]
async fn test_wrong_methods_are_rejected() {
    let harness = TestGateway::start();
    let server = harness.server();

    for response in [
        server.get("/requests").await,
        server.put("/requests").await,
        server.get("/api").await,
        server.post("/requests/0123456789abcdef/status").await,
        server.delete("/api/query/0123456789abcdef").await,
    ] {
        response.assert_status(StatusCode::METHOD_NOT_ALLOWED);
        let body: Value = response.json();
        assert_eq!(body["error"], "Method not allowed");
    }
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let harness = TestGateway::start();
    let server = harness.server();

    let response = server.get("/nowhere").await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_body_is_rejected() {
    let harness = TestGateway::start();
    let server = harness.server();

    let response = server
        .post("/requests")
        .bytes(Bytes::from_static(b"{not json"))
        .content_type("application/json")
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert!(body["error"]
        .as_str()
        .expect("error string")
        .starts_with("Invalid request body"));
    assert_eq!(harness.gateway.status().outstanding().await.unwrap(), 0);
}

#[tokio::test]
async fn test_missing_fields_are_listed() {
    let harness = TestGateway::start();
    let server = harness.server();

    let response = server
        .post("/requests")
        .json(&json!({ "domain": "node.example.com", "date": " " }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"], "Missing required fields: date, payorAddress");
}

#[tokio::test]
async fn test_invalid_date_is_rejected() {
    let harness = TestGateway::start();
    let server = harness.server();

    let response = server
        .post("/requests")
        .json(&json!({
            "domain": "node.example.com",
            "date": "2024-02-30",
            "payorAddress": "pokt1payor",
        }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(harness.gateway.status().outstanding().await.unwrap(), 0);
}

#[tokio::test]
async fn test_legacy_routes_and_field_names() {
    let harness = TestGateway::start();
    let server = harness.server();

    let response = server
        .post("/api")
        .json(&json!({
            "pokt_node_domain": "node.example.com",
            "date": "2024-06-01",
            "payor-address": "pokt1payor",
        }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    let secret = Secret::from(body["secret"].as_str().expect("secret string"));

    harness.oracle.pay(&secret);
    harness
        .wait_for_status(&secret, JobStatus::Completed, SETTLE)
        .await;

    let response = server
        .get(&format!("/api/query/{}", secret.as_str()))
        .await;
    response.assert_status_ok();
    assert_eq!(response.text(), TEST_CSV);
}

#[tokio::test]
async fn test_capacity_limit_returns_service_unavailable() {
    let mut config = GatewayConfig::default();
    config.jobs.max_outstanding = 2;
    let harness = TestGateway::with_config(config);
    let server = harness.server();

    for _ in 0..2 {
        server
            .post("/requests")
            .json(&sample_body())
            .await
            .assert_status_ok();
    }

    let response = server.post("/requests").json(&sample_body()).await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert!(!body["error"].as_str().expect("error string").is_empty());
}

#[tokio::test]
async fn test_health_reports_outstanding_jobs() {
    let harness = TestGateway::start();
    let server = harness.server();

    harness.create_sample_job().await;
    harness.create_sample_job().await;

    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["outstandingJobs"], 2);
}

#[tokio::test]
async fn test_completed_report_can_be_downloaded_again() {
    let harness = TestGateway::start();
    let server = harness.server();

    let secret = harness.create_sample_job().await;
    harness.oracle.pay(&secret);
    harness
        .wait_for_status(&secret, JobStatus::Completed, SETTLE)
        .await;

    let path = format!("/requests/{}/status", secret.as_str());
    let first = server.get(&path).await;
    let second = server.get(&path).await;
    first.assert_status_ok();
    second.assert_status_ok();
    assert_eq!(first.as_bytes(), second.as_bytes());
}
