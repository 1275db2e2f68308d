//! Helper functions for integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use netmon::{
    Measurements, Snapshot, VpnStatus,
    actors::{CollectorDeps, CollectorSettings, Scheduler},
    monitors::{
        CollectRequest, LocalProbe, MetricSampler, NetworkProber, Probe, ProbeError,
        ProbeSelector, SnapshotAssembler,
    },
    query::{ModelSession, QueryEngine},
    registry::{
        EntityKind, EntityRegistry, EntityStatus, MemoryRegistry, MonitoredEntity,
    },
    storage::{
        Aggregate, AggregateOp, EntityScope, HealthStatus, MemoryStore, Metric, SnapshotStore,
        StorageError, StorageResult,
    },
};
use tokio::sync::Notify;

pub const LOCAL_ID: &str = "localhost";

pub fn local_entity() -> MonitoredEntity {
    entity(LOCAL_ID, "Local machine", "127.0.0.1", EntityKind::Local)
}

pub fn entity(id: &str, name: &str, address: &str, kind: EntityKind) -> MonitoredEntity {
    let now = Utc::now();
    MonitoredEntity {
        id: id.to_string(),
        name: name.to_string(),
        address: address.to_string(),
        description: String::new(),
        kind,
        monitoring_enabled: false,
        status: EntityStatus::Unknown,
        created_at: now,
        updated_at: now,
        last_seen: None,
    }
}

pub fn snapshot(entity_id: &str, at: DateTime<Utc>) -> Snapshot {
    Snapshot {
        entity_id: entity_id.to_string(),
        timestamp: at,
        ..Default::default()
    }
}

pub fn cpu_snapshot(entity_id: &str, at: DateTime<Utc>, cpu: f64) -> Snapshot {
    let mut snapshot = snapshot(entity_id, at);
    snapshot.cpu.percent = Some(cpu);
    snapshot
}

pub fn vpn_snapshot(entity_id: &str, at: DateTime<Utc>, status: VpnStatus) -> Snapshot {
    let mut snapshot = snapshot(entity_id, at);
    snapshot.web.vpn_status = Some(status);
    snapshot
}

pub fn measurements(cpu: f64) -> Measurements {
    let mut measurements = Measurements::default();
    measurements.cpu.percent = Some(cpu);
    measurements.memory.percent = Some(40.0);
    measurements
}

/// Always answers with the same measurements
pub struct StaticProbe {
    pub measurements: Measurements,
    pub calls: AtomicUsize,
}

impl StaticProbe {
    pub fn new(measurements: Measurements) -> Arc<Self> {
        Arc::new(Self {
            measurements,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for StaticProbe {
    async fn collect(&self, _request: CollectRequest) -> Result<Measurements, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.measurements.clone())
    }
}

/// Blocks every collection until released
pub struct GatedProbe {
    pub gate: Notify,
    pub calls: AtomicUsize,
}

impl GatedProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Notify::new(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl Probe for GatedProbe {
    async fn collect(&self, _request: CollectRequest) -> Result<Measurements, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        Ok(measurements(10.0))
    }
}

/// Never reaches its entity
pub struct FailingProbe;

#[async_trait]
impl Probe for FailingProbe {
    async fn collect(&self, _request: CollectRequest) -> Result<Measurements, ProbeError> {
        Err(ProbeError::Unreachable {
            address: "10.0.0.99:8000".to_string(),
            reason: "connection refused".to_string(),
        })
    }
}

/// Hands out the same probe for every entity
pub struct SameProbe(pub Arc<dyn Probe>);

impl ProbeSelector for SameProbe {
    fn probe_for(&self, _entity: &MonitoredEntity) -> Arc<dyn Probe> {
        self.0.clone()
    }
}

/// A store whose backend cannot be reached
pub struct UnreachableStore;

fn store_down<T>() -> StorageResult<T> {
    Err(StorageError::Unavailable("connection refused".to_string()))
}

#[async_trait]
impl SnapshotStore for UnreachableStore {
    async fn append(&self, _snapshot: &Snapshot) -> StorageResult<()> {
        store_down()
    }

    async fn latest(&self, _scope: &EntityScope, _limit: usize) -> StorageResult<Vec<Snapshot>> {
        store_down()
    }

    async fn range(
        &self,
        _scope: &EntityScope,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> StorageResult<Vec<Snapshot>> {
        store_down()
    }

    async fn aggregate(
        &self,
        _scope: &EntityScope,
        _metric: Metric,
        _op: AggregateOp,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> StorageResult<Aggregate> {
        store_down()
    }

    async fn cleanup_before(&self, _before: DateTime<Utc>) -> StorageResult<usize> {
        store_down()
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        store_down()
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Scheduled ticks far enough apart to never fire during a test
pub fn quiet_settings() -> CollectorSettings {
    CollectorSettings {
        interval: Duration::from_secs(3600),
        max_backoff: Duration::from_secs(3600),
        speed_test_every: 0,
    }
}

/// A hub wired like the binary, with test doubles at the edges
pub struct TestHub {
    pub store: Arc<dyn SnapshotStore>,
    pub registry: Arc<dyn EntityRegistry>,
    pub scheduler: Arc<Scheduler>,
    pub engine: Arc<QueryEngine>,
    pub model: Arc<ModelSession>,
}

impl TestHub {
    pub async fn new(store: Arc<dyn SnapshotStore>, probes: Arc<dyn ProbeSelector>) -> Self {
        Self::with_model(store, probes, ModelSession::disabled()).await
    }

    pub async fn in_memory(probe: Arc<dyn Probe>) -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(SameProbe(probe))).await
    }

    pub async fn with_model(
        store: Arc<dyn SnapshotStore>,
        probes: Arc<dyn ProbeSelector>,
        model: ModelSession,
    ) -> Self {
        let registry: Arc<dyn EntityRegistry> =
            Arc::new(MemoryRegistry::with_entities(vec![local_entity()]));

        let deps = CollectorDeps {
            assembler: Arc::new(SnapshotAssembler::new()),
            store: store.clone(),
            registry: registry.clone(),
        };
        let scheduler = Arc::new(Scheduler::new(probes, deps, quiet_settings()));
        scheduler.sync_with_registry().await.unwrap();

        let model = Arc::new(model);
        let engine = Arc::new(QueryEngine::new(
            store.clone(),
            registry.clone(),
            model.clone(),
            LOCAL_ID,
        ));

        Self {
            store,
            registry,
            scheduler,
            engine,
            model,
        }
    }

    /// Serve the API on a random local port
    #[cfg(feature = "api")]
    pub async fn serve(&self) -> SocketAddr {
        use netmon::api::{ApiConfig, ApiState, spawn_api_server};

        let state = ApiState::new(
            self.store.clone(),
            self.scheduler.clone(),
            self.engine.clone(),
            Arc::new(bare_local_probe()),
            LOCAL_ID,
        );
        let config = ApiConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            enable_cors: true,
        };

        spawn_api_server(config, state).await.unwrap()
    }
}

/// Samples this host without any network providers
pub fn bare_local_probe() -> LocalProbe {
    LocalProbe::new(
        Arc::new(MetricSampler::new()),
        Arc::new(NetworkProber::new(
            Duration::from_millis(200),
            Duration::from_millis(200),
        )),
    )
}

/// Wait until `probe` has been called `n` times
pub async fn wait_for_calls(calls: impl Fn() -> usize, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while calls() < n {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("probe was not called in time");
}
