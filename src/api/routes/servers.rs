//! Entity registry endpoints

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use serde_json::{Value, json};
use tracing::info;

use crate::api::{
    error::ApiResult,
    state::ApiState,
    types::{
        CollectResponse, DataQuery, ServerHealthStatus, ServerInfo, ServersResponse,
        SnapshotsResponse, clamp_limit,
    },
};
use crate::registry::NewEntity;
use crate::storage::EntityScope;

/// GET /api/servers
///
/// List all registered entities with their health and job status
pub async fn list_servers(State(state): State<ApiState>) -> ApiResult<Json<ServersResponse>> {
    let entities = state.registry.list().await?;
    let jobs = state.scheduler.statuses().await;
    let now = Utc::now();

    let servers: Vec<ServerInfo> = entities
        .into_iter()
        .map(|entity| {
            let job = jobs.iter().find(|job| job.entity_id == entity.id).cloned();
            ServerInfo {
                health_status: ServerHealthStatus::of(&entity, job.as_ref(), now),
                entity,
                job,
            }
        })
        .collect();

    Ok(Json(ServersResponse {
        count: servers.len(),
        servers,
    }))
}

/// POST /api/servers
///
/// Register an entity and spawn its collection job
pub async fn create_server(
    State(state): State<ApiState>,
    Json(request): Json<NewEntity>,
) -> ApiResult<(StatusCode, Json<ServerInfo>)> {
    let entity = state.scheduler.add_entity(request).await?;
    info!(entity = %entity.id, address = %entity.address, "registered entity");

    let job = state.scheduler.status(&entity.id).await.ok();
    let server = ServerInfo {
        health_status: ServerHealthStatus::of(&entity, job.as_ref(), Utc::now()),
        entity,
        job,
    };

    Ok((StatusCode::CREATED, Json(server)))
}

/// DELETE /api/servers/:id
///
/// 409 when `id` is the last registered entity
pub async fn delete_server(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let entity = state.scheduler.remove_entity(&id).await?;
    info!(entity = %entity.id, "removed entity");

    Ok(Json(json!({
        "message": format!("removed {}", entity.id),
        "server": entity,
    })))
}

/// POST /api/servers/:id/collect
pub async fn collect_server(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CollectResponse>> {
    let snapshot = state.scheduler.collect_now(&id).await?;
    Ok(Json(CollectResponse {
        message: format!("collected {} at {}", snapshot.entity_id, snapshot.timestamp),
        snapshot,
    }))
}

/// GET /api/servers/:id/data?limit=N
pub async fn server_data(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<DataQuery>,
) -> ApiResult<Json<SnapshotsResponse>> {
    let entity = state.registry.get(&id).await?;
    let data = state
        .store
        .latest(&EntityScope::Entity(entity.id.clone()), clamp_limit(query.limit))
        .await?;

    Ok(Json(SnapshotsResponse {
        entity: entity.id,
        count: data.len(),
        data,
    }))
}
