//! Probe fallback and remote report tests
//!
//! These tests verify that:
//! - A timed-out provider falls back to the next one, and the written
//!   snapshot carries the fallback's value marked as degraded
//! - When every provider fails the field is null and the snapshot is still written
//! - Remote entities are collected through their `/api/report` endpoint

use std::sync::Arc;
use std::time::Duration;

use netmon::{
    Capability, ProbeHealth, VpnStatus,
    config::ProbeConfig,
    monitors::{LocalProbe, MetricSampler, NetworkProber, ProbeFactory},
    registry::{EntityKind, NewEntity},
    storage::{EntityScope, MemoryStore},
};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{LOCAL_ID, TestHub};

fn probe_config(server: &MockServer) -> ProbeConfig {
    serde_json::from_value(json!({
        "timeout_ms": 300,
        "ip_providers": [
            format!("{}/slow-ip", server.uri()),
            format!("{}/fast-ip", server.uri()),
        ],
        "geo_ip_url": format!("{}/geo/{{ip}}", server.uri()),
        "expected_country": "TR",
        "interface_vpn_detection": false,
        "speed_test": { "download_url": null, "every": 0 }
    }))
    .unwrap()
}

async fn hub_probing(config: &ProbeConfig) -> TestHub {
    let prober = NetworkProber::from_config(config).unwrap();
    let local = Arc::new(LocalProbe::new(
        Arc::new(MetricSampler::new()),
        Arc::new(prober),
    ));
    let probes = ProbeFactory::new(local, Duration::from_secs(5)).unwrap();
    TestHub::new(Arc::new(MemoryStore::new()), Arc::new(probes)).await
}

#[tokio::test]
async fn test_timed_out_provider_falls_back() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow-ip"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("198.51.100.1")
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fast-ip"))
        .respond_with(ResponseTemplate::new(200).set_body_string("203.0.113.7\n"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/geo/203.0.113.7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "country": "TR",
            "org": "AS9121 Turk Telekom"
        })))
        .mount(&server)
        .await;

    let hub = hub_probing(&probe_config(&server)).await;
    let snapshot = hub.scheduler.collect_now(LOCAL_ID).await.unwrap();

    assert_eq!(snapshot.web.public_ip, Some("203.0.113.7".parse().unwrap()));
    assert!(snapshot.web.is_degraded(Capability::PublicIp));

    let outcome = &snapshot.web.probes[&Capability::PublicIp];
    assert_eq!(outcome.health, ProbeHealth::Degraded);
    assert_eq!(outcome.failures.len(), 1);
    assert!(outcome.failures[0].provider.ends_with("/slow-ip"));

    // the geo lookup used the fallback's address
    assert_eq!(snapshot.web.vpn_status, Some(VpnStatus::Off));
    assert!(!snapshot.web.is_degraded(Capability::VpnState));

    let stored = hub
        .store
        .latest(&EntityScope::entity(LOCAL_ID), 1)
        .await
        .unwrap();
    assert_eq!(stored[0].web.public_ip, snapshot.web.public_ip);
    assert!(stored[0].web.is_degraded(Capability::PublicIp));
}

#[tokio::test]
async fn test_all_providers_failing_still_writes_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let hub = hub_probing(&probe_config(&server)).await;
    let snapshot = hub.scheduler.collect_now(LOCAL_ID).await.unwrap();

    assert_eq!(snapshot.web.public_ip, None);
    assert_eq!(
        snapshot.web.probes[&Capability::PublicIp].health,
        ProbeHealth::Unavailable
    );
    // no public IP, so the geo lookup had nothing to look up
    assert_eq!(snapshot.web.vpn_status, None);
    assert_eq!(
        snapshot.web.probes[&Capability::VpnState].health,
        ProbeHealth::Unavailable
    );

    let stored = hub.store.latest(&EntityScope::All, 10).await.unwrap();
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn test_remote_entity_reports_over_http() {
    let agent = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/report"))
        .and(query_param("speed_test", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "cpu": { "percent": 12.5, "logical_count": 4 },
            "memory": { "percent": 33.0, "total_bytes": 1024, "used_bytes": 338 },
            "disk": { "percent": 71.0, "total_bytes": null, "used_bytes": null },
            "network": { "io": null, "connection_count": 12 },
            "web": {
                "public_ip": "203.0.113.50",
                "vpn_status": "on",
                "download_mbps": 250.0,
                "upload_mbps": 40.0,
                "ping_ms": 9.0
            }
        })))
        .mount(&agent)
        .await;

    let hub = hub_probing(&ProbeConfig::default()).await;
    let remote = hub
        .scheduler
        .add_entity(NewEntity {
            name: "Office NAS".to_string(),
            address: agent.address().to_string(),
            kind: Some(EntityKind::Remote),
            ..Default::default()
        })
        .await
        .unwrap();

    let snapshot = hub.scheduler.collect_now(&remote.id).await.unwrap();
    assert_eq!(snapshot.entity_id, "office-nas");
    assert_eq!(snapshot.cpu.percent, Some(12.5));
    assert_eq!(snapshot.web.vpn_status, Some(VpnStatus::On));
    assert_eq!(snapshot.web.download_mbps, Some(250.0));
}

#[tokio::test]
async fn test_remote_legacy_report_is_normalized() {
    let agent = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/report"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "timestamp": "2025-03-01T10:15:00",
            "cpu_percent": 42.3,
            "memory_percent": 55.0,
            "disk_usage": 70.1,
            "download_speed": 88.8,
            "vpn_status": "no_vpn"
        })))
        .mount(&agent)
        .await;

    let hub = hub_probing(&ProbeConfig::default()).await;
    let remote = hub
        .scheduler
        .add_entity(NewEntity {
            name: "Legacy agent".to_string(),
            address: format!("http://{}", agent.address()),
            kind: Some(EntityKind::Remote),
            ..Default::default()
        })
        .await
        .unwrap();

    let snapshot = hub.scheduler.collect_now(&remote.id).await.unwrap();
    assert_eq!(snapshot.cpu.percent, Some(42.3));
    assert_eq!(snapshot.web.vpn_status, Some(VpnStatus::Off));
    // stamped by the hub, not the agent
    assert!(snapshot.timestamp > chrono::Utc::now() - chrono::Duration::minutes(1));
}

#[tokio::test]
async fn test_unreachable_remote_entity() {
    let hub = hub_probing(&ProbeConfig::default()).await;
    let remote = hub
        .scheduler
        .add_entity(NewEntity {
            name: "Gone".to_string(),
            // nothing listens on the discard port
            address: "127.0.0.1:9".to_string(),
            kind: Some(EntityKind::Remote),
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(hub.scheduler.collect_now(&remote.id).await.is_err());
    assert!(hub.store.latest(&EntityScope::All, 10).await.unwrap().is_empty());
}
