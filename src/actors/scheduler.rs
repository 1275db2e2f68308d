//! Scheduler - owns one collector actor per registered entity
//!
//! The registry decides which entities exist and whether their monitoring is
//! enabled; the scheduler keeps the set of running jobs in line with it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::Snapshot;
use crate::monitors::ProbeSelector;
use crate::registry::{EntityRegistry, MonitoredEntity, NewEntity};

use super::collector::{CollectorDeps, CollectorHandle, CollectorSettings};
use super::messages::{CollectError, JobStatus};

pub struct Scheduler {
    jobs: RwLock<HashMap<String, CollectorHandle>>,
    probes: Arc<dyn ProbeSelector>,
    deps: CollectorDeps,
    settings: CollectorSettings,
}

impl Scheduler {
    pub fn new(
        probes: Arc<dyn ProbeSelector>,
        deps: CollectorDeps,
        settings: CollectorSettings,
    ) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            probes,
            deps,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<dyn EntityRegistry> {
        &self.deps.registry
    }

    /// Spawn jobs for new entities and shut down jobs whose entity is gone.
    ///
    /// Returns the number of jobs afterwards.
    #[instrument(skip(self))]
    pub async fn sync_with_registry(&self) -> Result<usize, CollectError> {
        let entities = self.deps.registry.list().await?;

        for entity in &entities {
            self.spawn_job(entity).await;
        }

        let stale: Vec<String> = self
            .jobs
            .read()
            .await
            .keys()
            .filter(|id| !entities.iter().any(|e| &e.id == *id))
            .cloned()
            .collect();

        for id in stale {
            self.remove_job(&id).await;
        }

        let count = self.jobs.read().await.len();
        debug!("{count} collection jobs after registry sync");
        Ok(count)
    }

    /// Spawn the job for `entity` unless one already exists.
    pub async fn spawn_job(&self, entity: &MonitoredEntity) -> CollectorHandle {
        let mut jobs = self.jobs.write().await;
        if let Some(handle) = jobs.get(&entity.id) {
            return handle.clone();
        }

        info!(
            entity = %entity.id,
            kind = entity.kind.as_str(),
            enabled = entity.monitoring_enabled,
            "spawning collection job"
        );

        let handle = CollectorHandle::spawn(
            entity.id.clone(),
            self.probes.probe_for(entity),
            self.deps.clone(),
            self.settings,
            entity.monitoring_enabled,
        );
        jobs.insert(entity.id.clone(), handle.clone());
        handle
    }

    /// Shut down the job of `entity_id`, waiting for its in-flight run.
    pub async fn remove_job(&self, entity_id: &str) -> bool {
        let Some(handle) = self.jobs.write().await.remove(entity_id) else {
            return false;
        };

        if let Err(e) = handle.shutdown().await {
            warn!(entity = %entity_id, "collector already gone: {e}");
        }
        self.deps.assembler.forget(entity_id);
        info!(entity = %entity_id, "removed collection job");
        true
    }

    /// Register a new entity and spawn its job.
    pub async fn add_entity(&self, entity: NewEntity) -> Result<MonitoredEntity, CollectError> {
        let entity = self.deps.registry.add(entity).await?;
        self.spawn_job(&entity).await;
        Ok(entity)
    }

    /// Remove an entity from the registry, then stop its job.
    ///
    /// The registry refuses to remove the last entity, in which case the job
    /// keeps running.
    pub async fn remove_entity(&self, entity_id: &str) -> Result<MonitoredEntity, CollectError> {
        let entity = self.deps.registry.remove(entity_id).await?;
        self.remove_job(entity_id).await;
        Ok(entity)
    }

    async fn handle(&self, entity_id: &str) -> Result<CollectorHandle, CollectError> {
        if let Some(handle) = self.jobs.read().await.get(entity_id) {
            return Ok(handle.clone());
        }

        // registered after the last sync
        let entity = self.deps.registry.get(entity_id).await?;
        Ok(self.spawn_job(&entity).await)
    }

    /// Enable scheduled collection and persist the flag.
    pub async fn start(&self, entity_id: &str) -> Result<JobStatus, CollectError> {
        let handle = self.handle(entity_id).await?;
        self.deps.registry.set_monitoring(entity_id, true).await?;
        handle.start().await
    }

    /// Disable scheduled collection and persist the flag.
    pub async fn stop(&self, entity_id: &str) -> Result<JobStatus, CollectError> {
        let handle = self.handle(entity_id).await?;
        self.deps.registry.set_monitoring(entity_id, false).await?;
        handle.stop().await
    }

    pub async fn collect_now(&self, entity_id: &str) -> Result<Snapshot, CollectError> {
        self.handle(entity_id).await?.collect_now().await
    }

    pub async fn update_interval(&self, interval_secs: u64) -> Result<(), CollectError> {
        let jobs: Vec<CollectorHandle> = self.jobs.read().await.values().cloned().collect();
        for handle in jobs {
            handle.update_interval(interval_secs).await?;
        }
        Ok(())
    }

    pub async fn status(&self, entity_id: &str) -> Result<JobStatus, CollectError> {
        self.jobs
            .read()
            .await
            .get(entity_id)
            .map(CollectorHandle::status)
            .ok_or_else(|| CollectError::UnknownEntity(entity_id.to_string()))
    }

    /// Status of every job, ordered by entity id
    pub async fn statuses(&self) -> Vec<JobStatus> {
        let mut statuses: Vec<JobStatus> = self
            .jobs
            .read()
            .await
            .values()
            .map(CollectorHandle::status)
            .collect();
        statuses.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        statuses
    }

    /// Shut every job down, letting in-flight runs finish.
    pub async fn shutdown(&self) {
        let jobs: Vec<CollectorHandle> = self.jobs.write().await.drain().map(|(_, h)| h).collect();
        info!("shutting down {} collection jobs", jobs.len());

        let results = futures::future::join_all(jobs.iter().map(CollectorHandle::shutdown)).await;
        for (handle, result) in jobs.iter().zip(results) {
            if let Err(e) = result {
                warn!(entity = %handle.entity_id(), "collector already gone: {e}");
            }
        }
    }
}
