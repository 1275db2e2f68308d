//! End-to-end question answering over a populated store

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use netmon::{
    VpnStatus,
    query::{ModelError, ModelSession, Phrasing, TextGenerator},
    storage::{AggregateOp, MemoryStore, Metric, SnapshotStore},
};
use pretty_assertions::assert_eq;

use crate::helpers::{
    LOCAL_ID, SameProbe, StaticProbe, TestHub, cpu_snapshot, measurements, snapshot, vpn_snapshot,
};

async fn hub_with(snapshots: Vec<netmon::Snapshot>) -> TestHub {
    let store = Arc::new(MemoryStore::new());
    for snapshot in &snapshots {
        store.append(snapshot).await.unwrap();
    }
    TestHub::new(store, Arc::new(SameProbe(StaticProbe::new(measurements(1.0))))).await
}

#[tokio::test]
async fn test_cpu_usage_single_snapshot() {
    let hub = hub_with(vec![cpu_snapshot(
        LOCAL_ID,
        Utc::now() - Duration::minutes(3),
        42.3,
    )])
    .await;

    let answer = hub.engine.answer("CPU usage?").await.unwrap();
    assert!(answer.response.contains("42.3"), "{}", answer.response);
    assert_eq!(answer.intent.metric, Some(Metric::Cpu));
    assert_eq!(answer.phrasing, Phrasing::Template);
}

#[tokio::test]
async fn test_vpn_transitions_in_window() {
    let now = Utc::now();
    let before_window = now - Duration::hours(8);
    let turned_on = now - Duration::hours(5);
    let turned_off = now - Duration::hours(1);

    let hub = hub_with(vec![
        vpn_snapshot(LOCAL_ID, before_window, VpnStatus::Off),
        vpn_snapshot(LOCAL_ID, turned_on, VpnStatus::On),
        vpn_snapshot(LOCAL_ID, now - Duration::hours(3), VpnStatus::On),
        vpn_snapshot(LOCAL_ID, turned_off, VpnStatus::Off),
    ])
    .await;

    let answer = hub
        .engine
        .answer_at("VPN status in the last 6 hours?", now)
        .await
        .unwrap();
    assert_eq!(answer.intent.aggregation, AggregateOp::List);

    let text = &answer.response;
    let on_line = format!("{}: on", netmon::query::render::format_timestamp(turned_on));
    let off_line = format!("{}: off", netmon::query::render::format_timestamp(turned_off));

    let on_at = text.find(&on_line).expect("transition to on listed");
    let off_at = text.find(&off_line).expect("transition to off listed");
    assert!(on_at < off_at, "not chronological: {text}");

    assert!(!text.contains(&netmon::query::render::format_timestamp(before_window)));
    assert_eq!(text.lines().count(), 3, "{text}");
}

#[tokio::test]
async fn test_record_count_last_day() {
    let now = Utc::now();
    let mut snapshots = Vec::new();
    for hours in [40, 30, 26] {
        snapshots.push(snapshot(LOCAL_ID, now - Duration::hours(hours)));
    }
    for hours in [20, 12, 6, 2, 1] {
        snapshots.push(snapshot(LOCAL_ID, now - Duration::hours(hours)));
    }
    let hub = hub_with(snapshots).await;

    let answer = hub
        .engine
        .answer_at("How many records in the last day?", now)
        .await
        .unwrap();

    assert_eq!(answer.intent.aggregation, AggregateOp::Count);
    assert_eq!(
        answer.response,
        "Found 5 records for Local machine during the last day."
    );
}

#[tokio::test]
async fn test_question_about_all_entities() {
    let now = Utc::now();
    let hub = hub_with(vec![
        cpu_snapshot(LOCAL_ID, now - Duration::minutes(30), 20.0),
        cpu_snapshot("office-nas", now - Duration::minutes(20), 60.0),
    ])
    .await;

    let answer = hub
        .engine
        .answer_at("average cpu of all servers in the last 2 hours", now)
        .await
        .unwrap();
    assert!(answer.response.contains("40.0%"), "{}", answer.response);
    assert!(answer.response.contains("all servers"));
}

#[tokio::test]
async fn test_unreadable_question_still_answers() {
    let hub = hub_with(vec![]).await;
    let answer = hub.engine.answer("¿¿ ??").await.unwrap();
    assert_eq!(answer.response, netmon::query::NO_DATA_ANSWER);
}

/// Echoes a fixed rewording
struct Rewording(&'static str);

#[async_trait]
impl TextGenerator for Rewording {
    async fn warm_up(&self) -> Result<(), ModelError> {
        Ok(())
    }

    async fn generate(&self, _prompt: &str) -> Result<String, ModelError> {
        Ok(self.0.to_string())
    }
}

#[tokio::test]
async fn test_model_only_rewords_after_initialization() {
    let store = Arc::new(MemoryStore::new());
    store
        .append(&cpu_snapshot(LOCAL_ID, Utc::now() - Duration::minutes(1), 42.3))
        .await
        .unwrap();

    let hub = TestHub::with_model(
        store,
        Arc::new(SameProbe(StaticProbe::new(measurements(1.0)))),
        ModelSession::new(Some(Arc::new(Rewording("Your CPU is at 42.3% right now.")))),
    )
    .await;

    let before = hub.engine.answer("cpu usage?").await.unwrap();
    assert_eq!(before.phrasing, Phrasing::Template);
    assert!(!before.model_status.initialized);

    hub.model.initialize().await.unwrap();

    let after = hub.engine.answer("cpu usage?").await.unwrap();
    assert_eq!(after.phrasing, Phrasing::Model);
    assert_eq!(after.response, "Your CPU is at 42.3% right now.");
    assert_eq!(after.template, before.template);
}

#[tokio::test]
async fn test_model_rewording_losing_facts_is_discarded() {
    let store = Arc::new(MemoryStore::new());
    store
        .append(&cpu_snapshot(LOCAL_ID, Utc::now() - Duration::minutes(1), 42.3))
        .await
        .unwrap();

    let hub = TestHub::with_model(
        store,
        Arc::new(SameProbe(StaticProbe::new(measurements(1.0)))),
        ModelSession::new(Some(Arc::new(Rewording("Your CPU is fine.")))),
    )
    .await;
    hub.model.initialize().await.unwrap();

    let answer = hub.engine.answer("cpu usage?").await.unwrap();
    assert_eq!(answer.phrasing, Phrasing::Template);
    assert!(answer.response.contains("42.3"));
}
