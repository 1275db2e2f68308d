//! Integration tests for storage persistence
//!
//! These tests verify that:
//! - Snapshots and entities survive a restart of the SQLite backend
//! - Per-entity ordering holds across restarts
//! - Legacy documents are normalized on import
//! - Retention cleanup removes old snapshots

use std::path::Path;
use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use netmon::{
    actors::{CollectorDeps, RetentionHandle, Scheduler},
    monitors::SnapshotAssembler,
    registry::{EntityRegistry, EntityStatus, NewEntity, ensure_default, sqlite::SqliteRegistry},
    storage::{EntityScope, SnapshotStore, StorageError, sqlite::SqliteStore},
};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use crate::helpers::{
    LOCAL_ID, SameProbe, StaticProbe, local_entity, measurements, quiet_settings, snapshot,
};

struct Hub {
    store: Arc<SqliteStore>,
    registry: Arc<SqliteRegistry>,
    scheduler: Arc<Scheduler>,
}

async fn open_hub(db_path: &Path, cpu: f64) -> Hub {
    let store = Arc::new(SqliteStore::new(db_path).await.unwrap());
    let registry = Arc::new(SqliteRegistry::new(store.pool()));
    ensure_default(registry.as_ref(), local_entity()).await.unwrap();

    let deps = CollectorDeps {
        assembler: Arc::new(SnapshotAssembler::new()),
        store: store.clone(),
        registry: registry.clone(),
    };
    let probes = Arc::new(SameProbe(StaticProbe::new(measurements(cpu))));
    let scheduler = Arc::new(Scheduler::new(probes, deps, quiet_settings()));
    scheduler.sync_with_registry().await.unwrap();

    Hub {
        store,
        registry,
        scheduler,
    }
}

impl Hub {
    async fn close(self) {
        self.scheduler.shutdown().await;
        self.store.close().await.unwrap();
    }
}

#[tokio::test]
async fn test_snapshots_survive_restart() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("netmon.db");

    let hub = open_hub(&db_path, 42.3).await;
    let first = hub.scheduler.collect_now(LOCAL_ID).await.unwrap();
    let second = hub.scheduler.collect_now(LOCAL_ID).await.unwrap();
    hub.close().await;

    let hub = open_hub(&db_path, 7.0).await;
    let stored = hub
        .store
        .latest(&EntityScope::entity(LOCAL_ID), 10)
        .await
        .unwrap();
    assert_eq!(stored, vec![second.clone(), first]);

    // a fresh assembler continues after the stored timestamps
    let third = hub.scheduler.collect_now(LOCAL_ID).await.unwrap();
    assert!(third.timestamp > second.timestamp);
    assert_eq!(third.cpu.percent, Some(7.0));
    hub.close().await;
}

#[tokio::test]
async fn test_entities_survive_restart() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("netmon.db");

    let hub = open_hub(&db_path, 1.0).await;
    let nas = hub
        .scheduler
        .add_entity(NewEntity {
            name: "Office NAS".to_string(),
            address: "10.0.0.5:8000".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    hub.scheduler.start(LOCAL_ID).await.unwrap();
    hub.close().await;

    let hub = open_hub(&db_path, 1.0).await;
    let entities = hub.registry.list().await.unwrap();
    let ids: Vec<_> = entities.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec![LOCAL_ID, nas.id.as_str()]);

    let local = hub.registry.get(LOCAL_ID).await.unwrap();
    assert!(local.monitoring_enabled);

    // jobs come back with the persisted monitoring flags
    let statuses = hub.scheduler.statuses().await;
    assert_eq!(statuses.len(), 2);
    assert!(hub.scheduler.status(LOCAL_ID).await.unwrap().is_active());
    assert!(!hub.scheduler.status(&nas.id).await.unwrap().is_active());
    hub.close().await;
}

#[tokio::test]
async fn test_collection_updates_persisted_entity() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("netmon.db");

    let hub = open_hub(&db_path, 1.0).await;
    let snapshot = hub.scheduler.collect_now(LOCAL_ID).await.unwrap();
    hub.close().await;

    let store = SqliteStore::new(&db_path).await.unwrap();
    let registry = SqliteRegistry::new(store.pool());
    let local = registry.get(LOCAL_ID).await.unwrap();
    assert_eq!(local.status, EntityStatus::Active);
    assert_eq!(local.last_seen, Some(snapshot.timestamp));
    store.close().await.unwrap();
}

#[tokio::test]
async fn test_stale_timestamp_is_rejected() {
    let temp_dir = tempdir().unwrap();
    let store = SqliteStore::new(temp_dir.path().join("netmon.db"))
        .await
        .unwrap();

    let now = Utc::now();
    let at = chrono::DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap();
    store.append(&snapshot(LOCAL_ID, at)).await.unwrap();

    assert_matches!(
        store.append(&snapshot(LOCAL_ID, at)).await,
        Err(StorageError::TimestampConflict { .. })
    );
    assert_matches!(
        store
            .append(&snapshot(LOCAL_ID, at - Duration::seconds(1)))
            .await,
        Err(StorageError::TimestampConflict { .. })
    );

    // other entities are ordered independently
    store
        .append(&snapshot("office-nas", at - Duration::seconds(1)))
        .await
        .unwrap();

    let all = store.latest(&EntityScope::All, 10).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn test_import_legacy_document() {
    let temp_dir = tempdir().unwrap();
    let store = SqliteStore::new(temp_dir.path().join("netmon.db"))
        .await
        .unwrap();

    let document = serde_json::json!({
        "timestamp": "2025-03-01T10:15:00",
        "cpu_percent": 42.3,
        "memory_percent": 55.0,
        "disk_usage": 70.1,
        "vpn_status": "on",
        "download_speed": 88.8
    });
    let imported = store.import_document("legacy", &document).await.unwrap();
    assert_eq!(imported.entity_id, "legacy");

    let stored = store
        .latest(&EntityScope::entity("legacy"), 1)
        .await
        .unwrap();
    assert_eq!(stored, vec![imported]);
    assert_eq!(stored[0].cpu.percent, Some(42.3));
    assert_eq!(stored[0].web.download_mbps, Some(88.8));
}

#[tokio::test]
async fn test_retention_cleanup() {
    let temp_dir = tempdir().unwrap();
    let store = Arc::new(
        SqliteStore::new(temp_dir.path().join("netmon.db"))
            .await
            .unwrap(),
    );

    let now = Utc::now();
    for days_ago in [45, 31, 2] {
        store
            .append(&snapshot(LOCAL_ID, now - Duration::days(days_ago)))
            .await
            .unwrap();
    }

    let retention = RetentionHandle::spawn(
        store.clone(),
        30,
        std::time::Duration::from_secs(3600),
    );

    // cleanup runs once on startup
    let count = || {
        let store = store.clone();
        async move {
            store
                .latest(&EntityScope::entity(LOCAL_ID), 10)
                .await
                .unwrap()
                .len()
        }
    };
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while count().await > 1 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("old snapshots were not cleaned up");
    retention.shutdown().await;

    let remaining = store
        .latest(&EntityScope::entity(LOCAL_ID), 10)
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert!(remaining[0].timestamp > now - Duration::days(3));
}

#[tokio::test]
async fn test_closed_store_reports_unavailable() {
    let temp_dir = tempdir().unwrap();
    let hub = open_hub(&temp_dir.path().join("netmon.db"), 1.0).await;
    hub.store.close().await.unwrap();

    let result = hub.store.latest(&EntityScope::All, 1).await;
    assert_matches!(result, Err(err) if err.is_unavailable());

    // the run fails without writing
    assert!(hub.scheduler.collect_now(LOCAL_ID).await.is_err());
    hub.scheduler.shutdown().await;
}
