//! Registry of monitored entities
//!
//! The registry is the source of truth for which entities exist, how they
//! are probed and whether their collection job should be running. At least
//! one entity always exists: removing the last one is rejected.

pub mod memory;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::StorageError;

pub use memory::MemoryRegistry;

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("cannot remove {0}: at least one monitored entity must remain")]
    MinimumEntityViolation(String),

    #[error("invalid entity: {0}")]
    Invalid(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for RegistryError {
    fn from(err: sqlx::Error) -> Self {
        RegistryError::Storage(err.into())
    }
}

/// How an entity is probed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Sampled on this host
    Local,
    /// Asked for its own report over HTTP
    Remote,
}

impl EntityKind {
    /// Loopback addresses and `localhost` are sampled locally.
    pub fn infer(address: &str) -> Self {
        let authority = address
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .split('/')
            .next()
            .unwrap_or_default();

        let ip = authority
            .parse::<SocketAddr>()
            .map(|socket| socket.ip())
            .ok()
            .or_else(|| authority.parse::<IpAddr>().ok());

        let is_loopback = match ip {
            Some(ip) => ip.is_loopback(),
            None => authority
                .split(':')
                .next()
                .is_some_and(|host| host.eq_ignore_ascii_case("localhost")),
        };

        if is_loopback {
            EntityKind::Local
        } else {
            EntityKind::Remote
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Local => "local",
            EntityKind::Remote => "remote",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "local" => EntityKind::Local,
            _ => EntityKind::Remote,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    Active,
    Inactive,
    Unknown,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::Active => "active",
            EntityStatus::Inactive => "inactive",
            EntityStatus::Unknown => "unknown",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "active" => EntityStatus::Active,
            "inactive" => EntityStatus::Inactive,
            _ => EntityStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredEntity {
    pub id: String,
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub description: String,
    pub kind: EntityKind,
    pub monitoring_enabled: bool,
    pub status: EntityStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Request to register a new entity
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewEntity {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub description: String,
    pub kind: Option<EntityKind>,
    pub monitoring_enabled: Option<bool>,
}

impl NewEntity {
    /// Validate and turn the request into an entity with the given id.
    pub fn into_entity(self, id: String, now: DateTime<Utc>) -> RegistryResult<MonitoredEntity> {
        let name = self.name.trim().to_string();
        let address = self.address.trim().to_string();

        if name.is_empty() {
            return Err(RegistryError::Invalid("name must not be empty".to_string()));
        }
        if address.is_empty() {
            return Err(RegistryError::Invalid(
                "address must not be empty".to_string(),
            ));
        }

        let kind = self.kind.unwrap_or_else(|| EntityKind::infer(&address));

        Ok(MonitoredEntity {
            id,
            name,
            address,
            description: self.description,
            kind,
            monitoring_enabled: self.monitoring_enabled.unwrap_or(false),
            status: EntityStatus::Unknown,
            created_at: now,
            updated_at: now,
            last_seen: None,
        })
    }
}

/// Derive a readable id from a display name, `office-nas` for "Office NAS".
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }

    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "server".to_string()
    } else {
        slug
    }
}

/// First id derived from `name` not contained in `taken`.
pub fn unique_id<'a>(name: &str, taken: impl Iterator<Item = &'a str> + Clone) -> String {
    let base = slugify(name);
    if !taken.clone().any(|id| id == base) {
        return base;
    }

    (2..)
        .map(|n| format!("{base}-{n}"))
        .find(|candidate| !taken.clone().any(|id| id == candidate.as_str()))
        .unwrap_or(base)
}

#[async_trait]
pub trait EntityRegistry: Send + Sync {
    /// All entities in creation order
    async fn list(&self) -> RegistryResult<Vec<MonitoredEntity>>;

    async fn get(&self, id: &str) -> RegistryResult<MonitoredEntity>;

    /// Register a new entity under a fresh id
    async fn add(&self, entity: NewEntity) -> RegistryResult<MonitoredEntity>;

    /// Insert an entity with a fixed id unless one already exists
    async fn insert_if_missing(&self, entity: MonitoredEntity) -> RegistryResult<MonitoredEntity>;

    /// Remove an entity; the last remaining entity cannot be removed
    async fn remove(&self, id: &str) -> RegistryResult<MonitoredEntity>;

    async fn set_status(&self, id: &str, status: EntityStatus) -> RegistryResult<()>;

    async fn set_monitoring(&self, id: &str, enabled: bool) -> RegistryResult<MonitoredEntity>;

    /// Record a successful contact
    async fn touch(&self, id: &str, seen: DateTime<Utc>) -> RegistryResult<()>;
}

/// Make sure the configured local entity exists, returning the stored copy.
pub async fn ensure_default(
    registry: &dyn EntityRegistry,
    entity: MonitoredEntity,
) -> RegistryResult<MonitoredEntity> {
    registry.insert_if_missing(entity).await
}
