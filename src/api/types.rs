//! Shared API request and response types
//!
//! Responses derive `Deserialize` as well so clients (and the integration
//! tests) decode exactly what the handlers encode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actors::{CollectorSettings, JobState, JobStatus};
use crate::query::{InitOutcome, ModelState};
use crate::registry::{EntityStatus, MonitoredEntity};
use crate::{CpuSample, DiskSample, MemorySample, NetworkSample, Snapshot, SystemInformation};

/// Default number of snapshots returned by the data endpoints
pub const DEFAULT_LIMIT: usize = 10;

/// Upper bound on `limit`
pub const MAX_LIMIT: usize = 1000;

// ============================================================================
// Status Enums
// ============================================================================

/// Health of an entity as shown by the server list
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServerHealthStatus {
    /// Last collection succeeded and is recent
    Up,
    /// Last collection failed
    Down,
    /// Last successful collection is older than three intervals
    Stale,
    /// Never collected
    Unknown,
}

impl ServerHealthStatus {
    pub fn of(entity: &MonitoredEntity, job: Option<&JobStatus>, now: DateTime<Utc>) -> Self {
        match entity.status {
            EntityStatus::Inactive => ServerHealthStatus::Down,
            EntityStatus::Unknown => ServerHealthStatus::Unknown,
            EntityStatus::Active => {
                let interval = job.map_or_else(
                    || CollectorSettings::default().interval.as_secs(),
                    |job| job.interval_secs,
                );
                let stale_after = chrono::Duration::seconds(3 * interval as i64);
                match entity.last_seen {
                    Some(seen) if now - seen > stale_after => ServerHealthStatus::Stale,
                    Some(_) => ServerHealthStatus::Up,
                    None => ServerHealthStatus::Unknown,
                }
            }
        }
    }
}

// ============================================================================
// Query Parameters and Request Bodies
// ============================================================================

/// Query parameters of `/api/latest-data`
#[derive(Debug, Default, Deserialize)]
pub struct LatestQuery {
    pub limit: Option<usize>,

    /// Entity id, or `all`; the local entity when omitted
    pub entity: Option<String>,
}

/// Query parameters of `/api/servers/{id}/data`
#[derive(Debug, Default, Deserialize)]
pub struct DataQuery {
    pub limit: Option<usize>,
}

/// Query parameters of `/api/report`
#[derive(Debug, Default, Deserialize)]
pub struct ReportQuery {
    #[serde(default)]
    pub speed_test: bool,
}

/// Body of `POST /api/query`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub question: String,
}

/// Clamp a requested limit into `1..=MAX_LIMIT`.
pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

// ============================================================================
// Responses
// ============================================================================

/// Returned by GET /api/health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok` when the store answers, `degraded` otherwise
    pub status: String,
    pub storage_connected: bool,
    pub storage_message: String,
    pub timestamp: DateTime<Utc>,
}

/// Returned by GET /api/status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Whether scheduled collection of the local entity is enabled
    pub active: bool,
    pub state: JobState,
    pub interval_secs: u64,
    pub last_collection: Option<DateTime<Utc>>,
    pub next_collection: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    /// Every collection job, ordered by entity id
    pub jobs: Vec<JobStatus>,
}

impl StatusResponse {
    pub fn new(local: JobStatus, jobs: Vec<JobStatus>) -> Self {
        Self {
            active: local.is_active(),
            state: local.state,
            interval_secs: local.interval_secs,
            last_collection: local.last_collection,
            next_collection: local.next_collection,
            last_error: local.last_error,
            consecutive_failures: local.consecutive_failures,
            jobs,
        }
    }
}

/// Returned by the start/stop monitoring endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringResponse {
    pub message: String,
    pub status: JobStatus,
}

/// Returned by the manual collection endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectResponse {
    pub message: String,
    pub snapshot: Snapshot,
}

/// Returned by GET /api/latest-data and GET /api/servers/{id}/data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotsResponse {
    /// Entity id, or `all`
    pub entity: String,
    /// Newest first
    pub data: Vec<Snapshot>,
    pub count: usize,
}

/// Returned by GET /api/system-info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfoResponse {
    pub entity_id: String,
    /// Time of the stored snapshot; `None` for a fresh sample
    pub timestamp: Option<DateTime<Utc>>,
    /// Whether the values were sampled for this request
    pub fresh: bool,
    pub host: SystemInformation,
    pub cpu: CpuSample,
    pub memory: MemorySample,
    pub disk: DiskSample,
    pub network: NetworkSample,
}

/// Entity with its health and job status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(flatten)]
    pub entity: MonitoredEntity,
    pub health_status: ServerHealthStatus,
    pub job: Option<JobStatus>,
}

/// Returned by GET /api/servers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServersResponse {
    pub servers: Vec<ServerInfo>,
    pub count: usize,
}

/// Returned by POST /api/init-model
#[derive(Debug, Clone, Serialize)]
pub struct InitModelResponse {
    pub message: String,
    pub outcome: InitOutcome,
    pub model_status: ModelState,
}
