//! SQLite snapshot store
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: readers never wait on the writer
//! - **Connection pooling**: the entity registry shares the same pool
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! Averages and counts are pushed down into SQL over the typed metric
//! columns; change lists are computed from the decoded window.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::aggregate::{
    Aggregate, AggregateOp, EntityScope, Metric, Observation, aggregate_snapshots,
};
use super::backend::{HealthStatus, SnapshotStore};
use super::error::{StorageError, StorageResult};
use super::schema::{SnapshotRow, normalize_document};
use crate::Snapshot;

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// SQLite snapshot store
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path` and run migrations.
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite store at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    /// Connection pool shared with the SQLite entity registry
    pub fn pool(&self) -> Pool<Sqlite> {
        self.pool.clone()
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_default()
    }

    fn decode(row: &SqliteRow) -> StorageResult<Snapshot> {
        let entity_id: String = row.try_get("entity_id")?;
        let timestamp = Self::millis_to_timestamp(row.try_get("timestamp")?);
        let document: String = row.try_get("document")?;

        let value: serde_json::Value = serde_json::from_str(&document)?;
        let mut snapshot = normalize_document(&value, &entity_id, Some(timestamp))?;
        snapshot.entity_id = entity_id;
        Ok(snapshot)
    }

    /// `entity_id = ? AND ` prefix for entity scopes
    fn scope_clause(scope: &EntityScope) -> &'static str {
        match scope {
            EntityScope::Entity(_) => "entity_id = ? AND",
            EntityScope::All => "",
        }
    }

    fn bind_window<'q>(
        query: SqliteQuery<'q>,
        scope: &'q EntityScope,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> SqliteQuery<'q> {
        let query = match scope {
            EntityScope::Entity(id) => query.bind(id.as_str()),
            EntityScope::All => query,
        };
        query
            .bind(start.timestamp_millis())
            .bind(end.timestamp_millis())
    }

    async fn count(
        &self,
        scope: &EntityScope,
        column: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<usize> {
        let sql = format!(
            "SELECT COUNT({}) AS n FROM snapshots WHERE {} timestamp >= ? AND timestamp < ?",
            column.unwrap_or("*"),
            Self::scope_clause(scope)
        );

        let row = Self::bind_window(sqlx::query(&sql), scope, start, end)
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n.max(0) as usize)
    }

    async fn average(
        &self,
        scope: &EntityScope,
        column: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Aggregate> {
        let sql = format!(
            "SELECT AVG({column}) AS value, COUNT({column}) AS samples FROM snapshots \
             WHERE {} timestamp >= ? AND timestamp < ?",
            Self::scope_clause(scope)
        );

        let row = Self::bind_window(sqlx::query(&sql), scope, start, end)
            .fetch_one(&self.pool)
            .await?;

        let value: Option<f64> = row.try_get("value")?;
        let samples: i64 = row.try_get("samples")?;

        Ok(match value {
            Some(value) if samples > 0 => Aggregate::Average {
                value,
                samples: samples as usize,
            },
            _ => Aggregate::Empty,
        })
    }

    async fn last(
        &self,
        scope: &EntityScope,
        metric: Metric,
        column: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Aggregate> {
        let sql = format!(
            "SELECT entity_id, timestamp, document FROM snapshots \
             WHERE {} {column} IS NOT NULL AND timestamp >= ? AND timestamp < ? \
             ORDER BY timestamp DESC LIMIT 1",
            Self::scope_clause(scope)
        );

        let row = Self::bind_window(sqlx::query(&sql), scope, start, end)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(Aggregate::Empty);
        };

        let snapshot = Self::decode(&row)?;
        Ok(metric
            .value_of(&snapshot)
            .map(|value| {
                Aggregate::Last(Observation {
                    entity_id: snapshot.entity_id.clone(),
                    timestamp: snapshot.timestamp,
                    value,
                })
            })
            .unwrap_or(Aggregate::Empty))
    }
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    #[instrument(skip(self, snapshot), fields(entity = %snapshot.entity_id))]
    async fn append(&self, snapshot: &Snapshot) -> StorageResult<()> {
        let row = SnapshotRow::from_snapshot(snapshot)?;
        let conflict = || StorageError::TimestampConflict {
            entity_id: snapshot.entity_id.clone(),
            timestamp: snapshot.timestamp,
        };

        let mut tx = self.pool.begin().await?;

        let latest: Option<i64> =
            sqlx::query_scalar("SELECT MAX(timestamp) FROM snapshots WHERE entity_id = ?")
                .bind(&row.entity_id)
                .fetch_one(&mut *tx)
                .await?;

        if latest.is_some_and(|latest| latest >= row.timestamp) {
            return Err(conflict());
        }

        sqlx::query(
            r#"
            INSERT INTO snapshots (
                entity_id, timestamp, cpu_percent, memory_percent,
                disk_percent, download_mbps, vpn_status, document
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.entity_id)
        .bind(row.timestamp)
        .bind(row.cpu_percent)
        .bind(row.memory_percent)
        .bind(row.disk_percent)
        .bind(row.download_mbps)
        .bind(&row.vpn_status)
        .bind(&row.document)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => conflict(),
            other => other.into(),
        })?;

        tx.commit().await?;

        debug!("snapshot written");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn latest(&self, scope: &EntityScope, limit: usize) -> StorageResult<Vec<Snapshot>> {
        let where_clause = match scope {
            EntityScope::Entity(_) => "WHERE entity_id = ?",
            EntityScope::All => "",
        };
        let sql = format!(
            "SELECT entity_id, timestamp, document FROM snapshots {where_clause} \
             ORDER BY timestamp DESC LIMIT ?"
        );

        let mut query = sqlx::query(&sql);
        if let EntityScope::Entity(id) = scope {
            query = query.bind(id.as_str());
        }

        let rows = query.bind(limit as i64).fetch_all(&self.pool).await?;
        rows.iter().map(Self::decode).collect()
    }

    #[instrument(skip(self))]
    async fn range(
        &self,
        scope: &EntityScope,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<Snapshot>> {
        let sql = format!(
            "SELECT entity_id, timestamp, document FROM snapshots \
             WHERE {} timestamp >= ? AND timestamp < ? ORDER BY timestamp ASC",
            Self::scope_clause(scope)
        );

        let rows = Self::bind_window(sqlx::query(&sql), scope, start, end)
            .fetch_all(&self.pool)
            .await?;

        let snapshots: Vec<Snapshot> = rows.iter().map(Self::decode).collect::<Result<_, _>>()?;
        debug!("range query returned {} snapshots", snapshots.len());
        Ok(snapshots)
    }

    #[instrument(skip(self))]
    async fn aggregate(
        &self,
        scope: &EntityScope,
        metric: Metric,
        op: AggregateOp,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Aggregate> {
        match (metric.column(), op) {
            (None, _) => Ok(Aggregate::Count {
                count: self.count(scope, None, start, end).await?,
            }),
            (Some(column), AggregateOp::Count) => Ok(Aggregate::Count {
                count: self.count(scope, Some(column), start, end).await?,
            }),
            (Some(column), AggregateOp::Avg) if metric.is_numeric() => {
                self.average(scope, column, start, end).await
            }
            (Some(column), AggregateOp::Last) => {
                self.last(scope, metric, column, start, end).await
            }
            _ => {
                let window = self.range(scope, start, end).await?;
                Ok(aggregate_snapshots(&window, metric, op))
            }
        }
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn cleanup_before(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        info!("cleaning up snapshots older than {}", before);

        let result = sqlx::query("DELETE FROM snapshots WHERE timestamp < ?")
            .bind(before.timestamp_millis())
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() as usize;
        info!("deleted {} old snapshots", deleted);
        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => Ok(HealthStatus {
                healthy: true,
                message: "SQLite backend operational".to_string(),
                metadata: HashMap::from([
                    ("backend".to_string(), "sqlite".to_string()),
                    ("db_path".to_string(), self.db_path.clone()),
                ]),
            }),
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite store");
        self.pool.close().await;
        Ok(())
    }
}
