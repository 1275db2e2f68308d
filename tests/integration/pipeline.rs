//! Collection pipeline tests
//!
//! These tests verify that:
//! - A manual collection writes exactly one snapshot and updates the entity
//! - Per-entity timestamps are strictly increasing
//! - At most one run per entity is in flight
//! - Failed runs mark the entity inactive and keep the error

use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use netmon::{
    actors::{CollectError, JobState},
    registry::{EntityStatus, NewEntity},
    storage::EntityScope,
};
use pretty_assertions::assert_eq;

use crate::helpers::{
    FailingProbe, GatedProbe, LOCAL_ID, StaticProbe, TestHub, measurements, wait_for_calls,
};

#[tokio::test]
async fn test_manual_collection_writes_snapshot() {
    let probe = StaticProbe::new(measurements(42.3));
    let hub = TestHub::in_memory(probe.clone()).await;

    let snapshot = hub.scheduler.collect_now(LOCAL_ID).await.unwrap();
    assert_eq!(snapshot.entity_id, LOCAL_ID);
    assert_eq!(snapshot.cpu.percent, Some(42.3));
    assert_eq!(probe.calls(), 1);

    let stored = hub
        .store
        .latest(&EntityScope::entity(LOCAL_ID), 10)
        .await
        .unwrap();
    assert_eq!(stored, vec![snapshot.clone()]);

    let entity = hub.registry.get(LOCAL_ID).await.unwrap();
    assert_eq!(entity.status, EntityStatus::Active);
    assert_eq!(entity.last_seen, Some(snapshot.timestamp));

    let status = hub.scheduler.status(LOCAL_ID).await.unwrap();
    assert_eq!(status.runs, 1);
    assert_eq!(status.last_collection, Some(snapshot.timestamp));
}

#[tokio::test]
async fn test_timestamps_strictly_increasing() {
    let hub = TestHub::in_memory(StaticProbe::new(measurements(5.0))).await;

    for _ in 0..10 {
        hub.scheduler.collect_now(LOCAL_ID).await.unwrap();
    }

    let now = Utc::now();
    let written = hub
        .store
        .range(
            &EntityScope::entity(LOCAL_ID),
            now - Duration::hours(1),
            now + Duration::hours(1),
        )
        .await
        .unwrap();

    assert_eq!(written.len(), 10);
    assert!(
        written
            .windows(2)
            .all(|pair| pair[0].timestamp < pair[1].timestamp)
    );
}

#[tokio::test]
async fn test_single_run_in_flight() {
    let probe = GatedProbe::new();
    let hub = TestHub::in_memory(probe.clone()).await;

    let scheduler = hub.scheduler.clone();
    let first = tokio::spawn(async move { scheduler.collect_now(LOCAL_ID).await });

    wait_for_calls(|| probe.calls(), 1).await;
    assert_eq!(
        hub.scheduler.status(LOCAL_ID).await.unwrap().state,
        // manual runs are allowed while scheduled collection is off
        JobState::Disabled
    );

    let second = hub.scheduler.collect_now(LOCAL_ID).await;
    assert_matches!(second, Err(CollectError::AlreadyRunning(id)) if id == LOCAL_ID);

    probe.release();
    first.await.unwrap().unwrap();

    assert_eq!(probe.calls(), 1);
    let stored = hub
        .store
        .latest(&EntityScope::entity(LOCAL_ID), 10)
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn test_entities_collect_independently() {
    let gated = GatedProbe::new();
    let hub = TestHub::in_memory(gated.clone()).await;

    let nas = hub
        .scheduler
        .add_entity(NewEntity {
            name: "Office NAS".to_string(),
            address: "10.0.0.5:8000".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(nas.id, "office-nas");

    let scheduler = hub.scheduler.clone();
    let local_run = tokio::spawn(async move { scheduler.collect_now(LOCAL_ID).await });
    let scheduler = hub.scheduler.clone();
    let nas_run = tokio::spawn(async move { scheduler.collect_now("office-nas").await });

    // both runs are in flight at the same time
    wait_for_calls(|| gated.calls(), 2).await;

    gated.release();
    gated.release();
    local_run.await.unwrap().unwrap();
    nas_run.await.unwrap().unwrap();

    let all = hub.store.latest(&EntityScope::All, 10).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn test_failed_collection_marks_entity_inactive() {
    let hub = TestHub::in_memory(Arc::new(FailingProbe)).await;

    let result = hub.scheduler.collect_now(LOCAL_ID).await;
    assert_matches!(result, Err(CollectError::Probe(_)));

    let entity = hub.registry.get(LOCAL_ID).await.unwrap();
    assert_eq!(entity.status, EntityStatus::Inactive);

    let status = hub.scheduler.status(LOCAL_ID).await.unwrap();
    assert_eq!(status.consecutive_failures, 1);
    assert!(status.last_error.unwrap().contains("connection refused"));
    // disabled jobs do not back off
    assert_eq!(status.state, JobState::Disabled);

    let stored = hub.store.latest(&EntityScope::All, 10).await.unwrap();
    assert!(stored.is_empty());
}

#[tokio::test]
async fn test_start_and_stop_persist_monitoring_flag() {
    let probe = StaticProbe::new(measurements(1.0));
    let hub = TestHub::in_memory(probe.clone()).await;

    let status = hub.scheduler.start(LOCAL_ID).await.unwrap();
    assert!(status.is_active());
    assert!(hub.registry.get(LOCAL_ID).await.unwrap().monitoring_enabled);

    // starting collects right away
    wait_for_calls(|| probe.calls(), 1).await;

    let status = hub.scheduler.stop(LOCAL_ID).await.unwrap();
    assert_eq!(status.state, JobState::Disabled);
    assert!(!hub.registry.get(LOCAL_ID).await.unwrap().monitoring_enabled);
}

#[tokio::test]
async fn test_unknown_entity() {
    let hub = TestHub::in_memory(StaticProbe::new(measurements(1.0))).await;

    assert_matches!(
        hub.scheduler.collect_now("nope").await,
        Err(CollectError::Registry(_))
    );
    assert_matches!(
        hub.scheduler.status("nope").await,
        Err(CollectError::UnknownEntity(_))
    );
}
