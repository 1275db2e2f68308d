//! Integration tests for API endpoints
//!
//! These tests verify that:
//! - All REST endpoints return correct responses
//! - Typed errors map to the documented status codes and kinds
//! - The store being unreachable surfaces as 503

use std::sync::Arc;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use netmon::{
    Measurements,
    api::types::{
        CollectResponse, HealthResponse, MonitoringResponse, ServerHealthStatus, ServerInfo,
        ServersResponse, SnapshotsResponse, StatusResponse, SystemInfoResponse,
    },
    actors::JobState,
    storage::{MemoryStore, SnapshotStore},
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use crate::helpers::{
    GatedProbe, LOCAL_ID, SameProbe, StaticProbe, TestHub, UnreachableStore, cpu_snapshot,
    measurements, wait_for_calls,
};

async fn serve_in_memory() -> (TestHub, String) {
    let hub = TestHub::in_memory(StaticProbe::new(measurements(42.3))).await;
    let addr = hub.serve().await;
    (hub, format!("http://{addr}"))
}

async fn error_kind(response: reqwest::Response) -> String {
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string(), "{body}");
    body["kind"].as_str().unwrap_or_default().to_string()
}

#[tokio::test]
async fn test_health_endpoint_returns_ok() {
    let (_hub, base) = serve_in_memory().await;

    let response = reqwest::get(format!("{base}/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let health: HealthResponse = response.json().await.unwrap();
    assert_eq!(health.status, "ok");
    assert!(health.storage_connected);
}

#[tokio::test]
async fn test_health_reports_unreachable_store() {
    let probes = Arc::new(SameProbe(StaticProbe::new(measurements(1.0))));
    let hub = TestHub::new(Arc::new(UnreachableStore), probes).await;
    let addr = hub.serve().await;

    let response = reqwest::get(format!("http://{addr}/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let health: HealthResponse = response.json().await.unwrap();
    assert_eq!(health.status, "degraded");
    assert!(!health.storage_connected);
}

#[tokio::test]
async fn test_latest_data_with_unreachable_store() {
    let probes = Arc::new(SameProbe(StaticProbe::new(measurements(1.0))));
    let hub = TestHub::new(Arc::new(UnreachableStore), probes).await;
    let addr = hub.serve().await;

    let response = reqwest::get(format!("http://{addr}/api/latest-data"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(error_kind(response).await, "store_unavailable");

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/query"))
        .json(&json!({ "question": "cpu usage?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_collect_then_latest_data() {
    let (_hub, base) = serve_in_memory().await;
    let client = reqwest::Client::new();

    for _ in 0..3 {
        let response = client
            .post(format!("{base}/api/collect-data"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let collected: CollectResponse = response.json().await.unwrap();
        assert_eq!(collected.snapshot.cpu.percent, Some(42.3));
    }

    let latest: SnapshotsResponse = client
        .get(format!("{base}/api/latest-data?limit=2"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(latest.entity, LOCAL_ID);
    assert_eq!(latest.count, 2);
    assert!(latest.data[0].timestamp > latest.data[1].timestamp);

    let all: SnapshotsResponse = client
        .get(format!("{base}/api/latest-data?entity=all"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all.count, 3);

    let response = client
        .get(format!("{base}/api/latest-data?entity=nope"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_collect_while_running_conflicts() {
    let probe = GatedProbe::new();
    let hub = TestHub::in_memory(probe.clone()).await;
    let addr = hub.serve().await;
    let client = reqwest::Client::new();

    let url = format!("http://{addr}/api/collect-data");
    let first = tokio::spawn({
        let client = client.clone();
        let url = url.clone();
        async move { client.post(url).send().await.unwrap().status() }
    });
    wait_for_calls(|| probe.calls(), 1).await;

    let response = client.post(&url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(error_kind(response).await, "already_running");

    probe.release();
    assert_eq!(first.await.unwrap(), StatusCode::OK);
}

#[tokio::test]
async fn test_status_and_monitoring_toggle() {
    let (_hub, base) = serve_in_memory().await;
    let client = reqwest::Client::new();

    let status: StatusResponse = client
        .get(format!("{base}/api/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!status.active);
    assert_eq!(status.state, JobState::Disabled);
    assert_eq!(status.jobs.len(), 1);

    let started: MonitoringResponse = client
        .post(format!("{base}/api/start-monitoring"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(started.status.is_active());

    let status: StatusResponse = client
        .get(format!("{base}/api/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(status.active);

    let stopped: MonitoringResponse = client
        .post(format!("{base}/api/stop-monitoring"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stopped.status.state, JobState::Disabled);
}

#[tokio::test]
async fn test_server_lifecycle() {
    let (_hub, base) = serve_in_memory().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/api/servers"))
        .json(&json!({ "name": "Office NAS", "address": "10.0.0.5:8000" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: ServerInfo = response.json().await.unwrap();
    assert_eq!(created.entity.id, "office-nas");
    assert_eq!(created.health_status, ServerHealthStatus::Unknown);

    let servers: ServersResponse = client
        .get(format!("{base}/api/servers"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(servers.count, 2);
    assert!(servers.servers.iter().all(|s| s.job.is_some()));

    let response = client
        .post(format!("{base}/api/servers/office-nas/collect"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let data: SnapshotsResponse = client
        .get(format!("{base}/api/servers/office-nas/data?limit=5"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(data.count, 1);

    let response = client
        .delete(format!("{base}/api/servers/office-nas"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = client
        .delete(format!("{base}/api/servers/{LOCAL_ID}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(error_kind(response).await, "minimum_entity_violation");

    let response = client
        .delete(format!("{base}/api/servers/office-nas"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_kind(response).await, "entity_not_found");
}

#[tokio::test]
async fn test_invalid_server_is_rejected() {
    let (_hub, base) = serve_in_memory().await;

    let response = reqwest::Client::new()
        .post(format!("{base}/api/servers"))
        .json(&json!({ "name": "", "address": "10.0.0.5" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_kind(response).await, "invalid_request");
}

#[tokio::test]
async fn test_unknown_server_data() {
    let (_hub, base) = serve_in_memory().await;

    let response = reqwest::get(format!("{base}/api/servers/nope/data"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_query_endpoint() {
    let store = Arc::new(MemoryStore::new());
    store
        .append(&cpu_snapshot(LOCAL_ID, Utc::now() - Duration::minutes(2), 42.3))
        .await
        .unwrap();
    let hub = TestHub::new(
        store,
        Arc::new(SameProbe(StaticProbe::new(measurements(1.0)))),
    )
    .await;
    let addr = hub.serve().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/api/query"))
        .json(&json!({ "question": "CPU usage?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert!(body["response"].as_str().unwrap().contains("42.3"));
    assert_eq!(body["phrasing"], "template");
    assert_eq!(body["model_status"]["initialized"], false);
    assert_eq!(body["intent"]["metric"], "cpu");

    let response = client
        .post(format!("http://{addr}/api/query"))
        .json(&json!({ "question": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_model_endpoints_without_model() {
    let (_hub, base) = serve_in_memory().await;
    let client = reqwest::Client::new();

    let status: Value = client
        .get(format!("{base}/api/model-status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["initialized"], false);
    assert_eq!(status["status"], "not_initialized");

    let response = client
        .post(format!("{base}/api/init-model"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(error_kind(response).await, "model_not_configured");
}

#[tokio::test]
async fn test_system_info_and_report() {
    let (hub, base) = serve_in_memory().await;

    let fresh: SystemInfoResponse = reqwest::get(format!("{base}/api/system-info"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(fresh.fresh);
    assert_eq!(fresh.entity_id, LOCAL_ID);

    hub.scheduler.collect_now(LOCAL_ID).await.unwrap();
    let stored: SystemInfoResponse = reqwest::get(format!("{base}/api/system-info"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!stored.fresh);
    assert_eq!(stored.cpu.percent, Some(42.3));

    let response = reqwest::get(format!("{base}/api/report")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let report: Measurements = response.json().await.unwrap();
    // the bare prober has no network providers
    assert!(report.web.probes.is_empty());

    // reports are never persisted
    let latest = hub
        .store
        .latest(&netmon::storage::EntityScope::All, 10)
        .await
        .unwrap();
    assert_eq!(latest.len(), 1);
}
