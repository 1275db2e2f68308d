use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{
    EntityRegistry, EntityStatus, MonitoredEntity, NewEntity, RegistryError, RegistryResult,
    unique_id,
};

/// Registry kept in memory, used with the `none` storage backend and in tests
#[derive(Default)]
pub struct MemoryRegistry {
    entities: RwLock<Vec<MonitoredEntity>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entities(entities: Vec<MonitoredEntity>) -> Self {
        Self {
            entities: RwLock::new(entities),
        }
    }

    async fn update<F>(&self, id: &str, apply: F) -> RegistryResult<MonitoredEntity>
    where
        F: FnOnce(&mut MonitoredEntity),
    {
        let mut entities = self.entities.write().await;
        let entity = entities
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| RegistryError::EntityNotFound(id.to_string()))?;

        apply(entity);
        entity.updated_at = Utc::now();
        Ok(entity.clone())
    }
}

#[async_trait]
impl EntityRegistry for MemoryRegistry {
    async fn list(&self) -> RegistryResult<Vec<MonitoredEntity>> {
        Ok(self.entities.read().await.clone())
    }

    async fn get(&self, id: &str) -> RegistryResult<MonitoredEntity> {
        self.entities
            .read()
            .await
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| RegistryError::EntityNotFound(id.to_string()))
    }

    async fn add(&self, entity: NewEntity) -> RegistryResult<MonitoredEntity> {
        let mut entities = self.entities.write().await;

        let id = unique_id(&entity.name, entities.iter().map(|e| e.id.as_str()));
        let entity = entity.into_entity(id, Utc::now())?;
        entities.push(entity.clone());

        info!(entity = %entity.id, "registered entity");
        Ok(entity)
    }

    async fn insert_if_missing(&self, entity: MonitoredEntity) -> RegistryResult<MonitoredEntity> {
        let mut entities = self.entities.write().await;

        if let Some(existing) = entities.iter().find(|e| e.id == entity.id) {
            return Ok(existing.clone());
        }

        debug!(entity = %entity.id, "inserting default entity");
        entities.push(entity.clone());
        Ok(entity)
    }

    async fn remove(&self, id: &str) -> RegistryResult<MonitoredEntity> {
        let mut entities = self.entities.write().await;

        let position = entities
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| RegistryError::EntityNotFound(id.to_string()))?;

        if entities.len() <= 1 {
            return Err(RegistryError::MinimumEntityViolation(id.to_string()));
        }

        let removed = entities.remove(position);
        info!(entity = %removed.id, "removed entity");
        Ok(removed)
    }

    async fn set_status(&self, id: &str, status: EntityStatus) -> RegistryResult<()> {
        self.update(id, |e| e.status = status).await.map(|_| ())
    }

    async fn set_monitoring(&self, id: &str, enabled: bool) -> RegistryResult<MonitoredEntity> {
        self.update(id, |e| e.monitoring_enabled = enabled).await
    }

    async fn touch(&self, id: &str, seen: DateTime<Utc>) -> RegistryResult<()> {
        self.update(id, |e| e.last_seen = Some(seen)).await.map(|_| ())
    }
}
