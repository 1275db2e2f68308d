//! API shared state containing the service handles

use std::sync::Arc;

use crate::actors::Scheduler;
use crate::monitors::LocalProbe;
use crate::query::QueryEngine;
use crate::registry::EntityRegistry;
use crate::storage::SnapshotStore;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Snapshot history, read directly by the data endpoints
    pub store: Arc<dyn SnapshotStore>,

    pub registry: Arc<dyn EntityRegistry>,

    /// Owns one collector job per entity
    pub scheduler: Arc<Scheduler>,

    pub engine: Arc<QueryEngine>,

    /// Fresh, unpersisted samples for `/api/report` and `/api/system-info`
    pub local_probe: Arc<LocalProbe>,

    /// Entity the `/api/*-monitoring` and `/api/collect-data` endpoints act on
    pub local_entity_id: String,
}

impl ApiState {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        scheduler: Arc<Scheduler>,
        engine: Arc<QueryEngine>,
        local_probe: Arc<LocalProbe>,
        local_entity_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry: scheduler.registry().clone(),
            scheduler,
            engine,
            local_probe,
            local_entity_id: local_entity_id.into(),
        }
    }
}
