//! Endpoints acting on the local entity

use axum::{
    Json,
    extract::{Query, State},
};
use tracing::debug;

use crate::Measurements;
use crate::api::{
    error::ApiResult,
    state::ApiState,
    types::{
        CollectResponse, LatestQuery, MonitoringResponse, ReportQuery, SnapshotsResponse,
        StatusResponse, SystemInfoResponse, clamp_limit,
    },
};
use crate::monitors::CollectRequest;
use crate::storage::EntityScope;

/// GET /api/system-info
///
/// System fields of the latest local snapshot, sampled fresh when nothing
/// has been stored yet.
pub async fn system_info(State(state): State<ApiState>) -> ApiResult<Json<SystemInfoResponse>> {
    let scope = EntityScope::Entity(state.local_entity_id.clone());
    let latest = state.store.latest(&scope, 1).await?;

    let response = match latest.into_iter().next() {
        Some(snapshot) => SystemInfoResponse {
            entity_id: snapshot.entity_id,
            timestamp: Some(snapshot.timestamp),
            fresh: false,
            host: snapshot.host,
            cpu: snapshot.cpu,
            memory: snapshot.memory,
            disk: snapshot.disk,
            network: snapshot.network,
        },
        None => {
            debug!("no stored snapshot, sampling system info");
            let sample = state.local_probe.system().await;
            SystemInfoResponse {
                entity_id: state.local_entity_id.clone(),
                timestamp: None,
                fresh: true,
                host: sample.host,
                cpu: sample.cpu,
                memory: sample.memory,
                disk: sample.disk,
                network: sample.network,
            }
        }
    };

    Ok(Json(response))
}

/// GET /api/latest-data?limit=N&entity=ID
///
/// Most recent snapshots, newest first. `entity=all` spans every entity.
pub async fn latest_data(
    State(state): State<ApiState>,
    Query(query): Query<LatestQuery>,
) -> ApiResult<Json<SnapshotsResponse>> {
    let limit = clamp_limit(query.limit);
    let (entity, scope) = match query.entity.as_deref() {
        Some("all") => ("all".to_string(), EntityScope::All),
        Some(id) => {
            state.registry.get(id).await?;
            (id.to_string(), EntityScope::Entity(id.to_string()))
        }
        None => (
            state.local_entity_id.clone(),
            EntityScope::Entity(state.local_entity_id.clone()),
        ),
    };

    let data = state.store.latest(&scope, limit).await?;

    Ok(Json(SnapshotsResponse {
        entity,
        count: data.len(),
        data,
    }))
}

/// GET /api/status
pub async fn status(State(state): State<ApiState>) -> ApiResult<Json<StatusResponse>> {
    let local = state.scheduler.status(&state.local_entity_id).await?;
    let jobs = state.scheduler.statuses().await;
    Ok(Json(StatusResponse::new(local, jobs)))
}

/// POST /api/collect-data
///
/// Collect the local entity now, speed test included. 409 while a run is
/// in flight.
pub async fn collect_data(State(state): State<ApiState>) -> ApiResult<Json<CollectResponse>> {
    let snapshot = state.scheduler.collect_now(&state.local_entity_id).await?;
    Ok(Json(CollectResponse {
        message: format!("collected {} at {}", snapshot.entity_id, snapshot.timestamp),
        snapshot,
    }))
}

/// POST /api/start-monitoring
pub async fn start_monitoring(
    State(state): State<ApiState>,
) -> ApiResult<Json<MonitoringResponse>> {
    let status = state.scheduler.start(&state.local_entity_id).await?;
    Ok(Json(MonitoringResponse {
        message: "monitoring started".to_string(),
        status,
    }))
}

/// POST /api/stop-monitoring
pub async fn stop_monitoring(
    State(state): State<ApiState>,
) -> ApiResult<Json<MonitoringResponse>> {
    let status = state.scheduler.stop(&state.local_entity_id).await?;
    Ok(Json(MonitoringResponse {
        message: "monitoring stopped".to_string(),
        status,
    }))
}

/// GET /api/report?speed_test=true
///
/// This host's own measurements, not persisted. Read by the `RemoteProbe`
/// of another hub.
pub async fn report(
    State(state): State<ApiState>,
    Query(query): Query<ReportQuery>,
) -> Json<Measurements> {
    let request = CollectRequest {
        include_speed_test: query.speed_test,
    };
    Json(state.local_probe.report(request).await)
}
