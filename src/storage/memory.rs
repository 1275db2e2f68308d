//! In-memory snapshot store (no persistence)
//!
//! Snapshots are kept per entity in timestamp order, which makes windowed
//! reads a pair of binary searches. Useful for tests and for deployments
//! that configure `storage.backend = "none"`.
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart
//! - **Bounded**: each entity keeps at most [`MAX_SNAPSHOTS_PER_ENTITY`]
//!   snapshots (about two weeks at the default two-minute interval). Older ones
//!   are evicted on append, so windowed answers past that horizon see no
//!   data. The first eviction per entity is logged at `warn`.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use super::aggregate::{Aggregate, AggregateOp, EntityScope, Metric, aggregate_snapshots};
use super::backend::{HealthStatus, SnapshotStore};
use super::error::{StorageError, StorageResult};
use crate::Snapshot;

/// Maximum snapshots to keep in memory per entity
pub const MAX_SNAPSHOTS_PER_ENTITY: usize = 10_000;

/// In-memory store guarded by a short-lived read/write lock
pub struct MemoryStore {
    snapshots: RwLock<HashMap<String, VecDeque<Snapshot>>>,
    capacity: usize,
    /// Entities that have already had a snapshot evicted
    evicting: Mutex<HashSet<String>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_capacity(MAX_SNAPSHOTS_PER_ENTITY)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store keeping at most `capacity` snapshots per entity (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            snapshots: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            evicting: Mutex::new(HashSet::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn window(
        series: &VecDeque<Snapshot>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> impl Iterator<Item = &Snapshot> {
        let lower = series.partition_point(|s| s.timestamp < start);
        let upper = series.partition_point(|s| s.timestamp < end).max(lower);
        series.range(lower..upper)
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn append(&self, snapshot: &Snapshot) -> StorageResult<()> {
        let mut snapshots = self.snapshots.write();
        let series = snapshots.entry(snapshot.entity_id.clone()).or_default();

        if series
            .back()
            .is_some_and(|latest| latest.timestamp >= snapshot.timestamp)
        {
            return Err(StorageError::TimestampConflict {
                entity_id: snapshot.entity_id.clone(),
                timestamp: snapshot.timestamp,
            });
        }

        if series.len() >= self.capacity {
            if let Some(evicted) = series.pop_front() {
                if self.evicting.lock().insert(snapshot.entity_id.clone()) {
                    warn!(
                        entity = %snapshot.entity_id,
                        capacity = self.capacity,
                        evicted_at = %evicted.timestamp,
                        "memory store is full for this entity, evicting oldest snapshots"
                    );
                } else {
                    trace!(entity = %snapshot.entity_id, "evicted oldest snapshot");
                }
            }
        }
        series.push_back(snapshot.clone());

        trace!(entity = %snapshot.entity_id, "appended snapshot to memory store");
        Ok(())
    }

    async fn latest(&self, scope: &EntityScope, limit: usize) -> StorageResult<Vec<Snapshot>> {
        let snapshots = self.snapshots.read();

        let mut latest: Vec<Snapshot> = match scope {
            EntityScope::Entity(id) => snapshots
                .get(id)
                .map(|series| series.iter().rev().take(limit).cloned().collect())
                .unwrap_or_default(),
            EntityScope::All => snapshots
                .values()
                .flat_map(|series| series.iter().rev().take(limit))
                .cloned()
                .collect(),
        };
        drop(snapshots);

        latest.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        latest.truncate(limit);
        Ok(latest)
    }

    async fn range(
        &self,
        scope: &EntityScope,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<Snapshot>> {
        let snapshots = self.snapshots.read();

        let mut window: Vec<Snapshot> = snapshots
            .iter()
            .filter(|(id, _)| scope.matches(id))
            .flat_map(|(_, series)| Self::window(series, start, end))
            .cloned()
            .collect();
        drop(snapshots);

        window.sort_by_key(|s| s.timestamp);
        debug!("memory range query returned {} snapshots", window.len());
        Ok(window)
    }

    async fn aggregate(
        &self,
        scope: &EntityScope,
        metric: Metric,
        op: AggregateOp,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Aggregate> {
        let window = self.range(scope, start, end).await?;
        Ok(aggregate_snapshots(&window, metric, op))
    }

    async fn cleanup_before(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut snapshots = self.snapshots.write();
        let mut deleted = 0;

        for series in snapshots.values_mut() {
            let stale = series.partition_point(|s| s.timestamp < before);
            series.drain(..stale);
            deleted += stale;
        }

        debug!("deleted {} snapshots from memory store", deleted);
        Ok(deleted)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let snapshots = self.snapshots.read();
        let total: usize = snapshots.values().map(VecDeque::len).sum();

        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("entities".to_string(), snapshots.len().to_string()),
                ("total_snapshots".to_string(), total.to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory store (no-op)");
        Ok(())
    }
}
