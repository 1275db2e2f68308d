//! Snapshot store trait definition
//!
//! This module defines the `SnapshotStore` trait that every time-series
//! backend implements.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::aggregate::{Aggregate, AggregateOp, EntityScope, Metric};
use super::error::StorageResult;
use super::schema::normalize_document;
use crate::Snapshot;

/// Health status of the storage backend
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Append-only time-series store for snapshots
///
/// ## Ordering
///
/// Timestamps are strictly increasing per entity. An append whose timestamp
/// is not after the entity's latest snapshot (a duplicate included) is
/// rejected with `StorageError::TimestampConflict` and never overwrites.
///
/// ## Windows
///
/// Every windowed read covers the half-open interval `[start, end)` and
/// returns snapshots oldest first.
///
/// ## Concurrency
///
/// Implementations must be `Send + Sync`. Reads must not wait on writers:
/// the memory backend only holds its lock for the copy, the SQLite backend
/// runs in WAL mode.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Append one snapshot atomically
    async fn append(&self, snapshot: &Snapshot) -> StorageResult<()>;

    /// The `limit` most recent snapshots in scope, newest first
    async fn latest(&self, scope: &EntityScope, limit: usize) -> StorageResult<Vec<Snapshot>>;

    /// Snapshots in scope within `[start, end)`, oldest first
    async fn range(
        &self,
        scope: &EntityScope,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<Snapshot>>;

    /// Aggregate one metric over `[start, end)`
    async fn aggregate(
        &self,
        scope: &EntityScope,
        metric: Metric,
        op: AggregateOp,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Aggregate>;

    /// Delete snapshots older than `before`, returning how many were removed
    async fn cleanup_before(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    /// Lightweight connectivity probe
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;

    /// Normalize a stored document of any known shape and append it.
    async fn import_document(
        &self,
        entity_id: &str,
        document: &serde_json::Value,
    ) -> StorageResult<Snapshot> {
        let mut snapshot = normalize_document(document, entity_id, None)?;
        snapshot.entity_id = entity_id.to_string();
        self.append(&snapshot).await?;
        Ok(snapshot)
    }
}
