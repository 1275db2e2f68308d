use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use tracing::{info, instrument};

use super::{
    EntityKind, EntityRegistry, EntityStatus, MonitoredEntity, NewEntity, RegistryError,
    RegistryResult, unique_id,
};

/// Registry stored in the `entities` table next to the snapshots
pub struct SqliteRegistry {
    pool: Pool<Sqlite>,
}

const SELECT_ENTITY: &str = "SELECT id, name, address, description, kind, monitoring_enabled, \
     status, created_at, updated_at, last_seen FROM entities";

impl SqliteRegistry {
    /// Build on an already migrated pool, see `SqliteStore::pool`.
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    fn millis(ts: DateTime<Utc>) -> i64 {
        ts.timestamp_millis()
    }

    fn timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_default()
    }

    fn decode(row: &SqliteRow) -> RegistryResult<MonitoredEntity> {
        let kind: String = row.try_get("kind")?;
        let status: String = row.try_get("status")?;
        let last_seen: Option<i64> = row.try_get("last_seen")?;

        Ok(MonitoredEntity {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            address: row.try_get("address")?,
            description: row.try_get("description")?,
            kind: EntityKind::parse(&kind),
            monitoring_enabled: row.try_get("monitoring_enabled")?,
            status: EntityStatus::parse(&status),
            created_at: Self::timestamp(row.try_get("created_at")?),
            updated_at: Self::timestamp(row.try_get("updated_at")?),
            last_seen: last_seen.map(Self::timestamp),
        })
    }

    async fn insert<'e, E>(executor: E, entity: &MonitoredEntity) -> RegistryResult<()>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO entities (
                id, name, address, description, kind, monitoring_enabled,
                status, created_at, updated_at, last_seen
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entity.id)
        .bind(&entity.name)
        .bind(&entity.address)
        .bind(&entity.description)
        .bind(entity.kind.as_str())
        .bind(entity.monitoring_enabled)
        .bind(entity.status.as_str())
        .bind(Self::millis(entity.created_at))
        .bind(Self::millis(entity.updated_at))
        .bind(entity.last_seen.map(Self::millis))
        .execute(executor)
        .await?;
        Ok(())
    }

    fn expect_updated(id: &str, rows_affected: u64) -> RegistryResult<()> {
        if rows_affected == 0 {
            Err(RegistryError::EntityNotFound(id.to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EntityRegistry for SqliteRegistry {
    async fn list(&self) -> RegistryResult<Vec<MonitoredEntity>> {
        let rows = sqlx::query(&format!("{SELECT_ENTITY} ORDER BY created_at ASC, id ASC"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::decode).collect()
    }

    async fn get(&self, id: &str) -> RegistryResult<MonitoredEntity> {
        let row = sqlx::query(&format!("{SELECT_ENTITY} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RegistryError::EntityNotFound(id.to_string()))?;
        Self::decode(&row)
    }

    #[instrument(skip(self, entity), fields(name = %entity.name))]
    async fn add(&self, entity: NewEntity) -> RegistryResult<MonitoredEntity> {
        let mut tx = self.pool.begin().await?;

        let taken: Vec<String> = sqlx::query_scalar("SELECT id FROM entities")
            .fetch_all(&mut *tx)
            .await?;
        let id = unique_id(&entity.name, taken.iter().map(String::as_str));
        let entity = entity.into_entity(id, Utc::now())?;

        Self::insert(&mut *tx, &entity).await?;
        tx.commit().await?;

        info!(entity = %entity.id, "registered entity");
        Ok(entity)
    }

    async fn insert_if_missing(&self, entity: MonitoredEntity) -> RegistryResult<MonitoredEntity> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(&format!("{SELECT_ENTITY} WHERE id = ?"))
            .bind(&entity.id)
            .fetch_optional(&mut *tx)
            .await?;

        if let Some(row) = existing {
            return Self::decode(&row);
        }

        Self::insert(&mut *tx, &entity).await?;
        tx.commit().await?;
        Ok(entity)
    }

    #[instrument(skip(self))]
    async fn remove(&self, id: &str) -> RegistryResult<MonitoredEntity> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!("{SELECT_ENTITY} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| RegistryError::EntityNotFound(id.to_string()))?;
        let entity = Self::decode(&row)?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entities")
            .fetch_one(&mut *tx)
            .await?;
        if count <= 1 {
            return Err(RegistryError::MinimumEntityViolation(id.to_string()));
        }

        sqlx::query("DELETE FROM entities WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(entity = %id, "removed entity");
        Ok(entity)
    }

    async fn set_status(&self, id: &str, status: EntityStatus) -> RegistryResult<()> {
        let result = sqlx::query("UPDATE entities SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Self::millis(Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Self::expect_updated(id, result.rows_affected())
    }

    async fn set_monitoring(&self, id: &str, enabled: bool) -> RegistryResult<MonitoredEntity> {
        let result = sqlx::query(
            "UPDATE entities SET monitoring_enabled = ?, updated_at = ? WHERE id = ?",
        )
        .bind(enabled)
        .bind(Self::millis(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Self::expect_updated(id, result.rows_affected())?;
        self.get(id).await
    }

    async fn touch(&self, id: &str, seen: DateTime<Utc>) -> RegistryResult<()> {
        let result = sqlx::query("UPDATE entities SET last_seen = ? WHERE id = ?")
            .bind(Self::millis(seen))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Self::expect_updated(id, result.rows_affected())
    }
}
