//! API error types and conversions
//!
//! Every error is returned as `{"error": message, "kind": snake_case_kind}`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::actors::CollectError;
use crate::query::{ModelError, QueryError};
use crate::registry::RegistryError;
use crate::storage::StorageError;

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

/// API error types
#[derive(Debug)]
pub enum ApiError {
    /// The snapshot store cannot be reached
    StoreUnavailable(String),

    /// Entity not found
    NotFound(String),

    /// Removing the last entity
    MinimumEntity(String),

    /// Snapshot timestamp not after the entity's latest
    TimestampConflict(String),

    /// A collection is already in flight for the entity
    AlreadyRunning(String),

    /// The language model was asked for before `init-model`
    ModelNotInitialized(String),

    /// No language model is configured
    ModelNotConfigured(String),

    /// Invalid request parameters
    InvalidRequest(String),

    /// A remote entity could not be probed
    ProbeFailure(String),

    /// Internal server error
    Internal(String),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::StoreUnavailable(_) => "store_unavailable",
            ApiError::NotFound(_) => "entity_not_found",
            ApiError::MinimumEntity(_) => "minimum_entity_violation",
            ApiError::TimestampConflict(_) => "timestamp_conflict",
            ApiError::AlreadyRunning(_) => "already_running",
            ApiError::ModelNotInitialized(_) => "model_not_initialized",
            ApiError::ModelNotConfigured(_) => "model_not_configured",
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::ProbeFailure(_) => "probe_failure",
            ApiError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MinimumEntity(_)
            | ApiError::TimestampConflict(_)
            | ApiError::AlreadyRunning(_)
            | ApiError::ModelNotInitialized(_)
            | ApiError::ModelNotConfigured(_) => StatusCode::CONFLICT,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ProbeFailure(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        let error_message = match self {
            ApiError::StoreUnavailable(msg)
            | ApiError::NotFound(msg)
            | ApiError::MinimumEntity(msg)
            | ApiError::TimestampConflict(msg)
            | ApiError::AlreadyRunning(msg)
            | ApiError::ModelNotInitialized(msg)
            | ApiError::ModelNotConfigured(msg)
            | ApiError::InvalidRequest(msg)
            | ApiError::ProbeFailure(msg)
            | ApiError::Internal(msg) => msg,
        };

        if status.is_server_error() {
            tracing::error!(kind, "{error_message}");
        }

        let body = Json(json!({
            "error": error_message,
            "kind": kind,
        }));

        (status, body).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::TimestampConflict { .. } => ApiError::TimestampConflict(err.to_string()),
            err if err.is_unavailable() => ApiError::StoreUnavailable(err.to_string()),
            err => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::EntityNotFound(_) => ApiError::NotFound(err.to_string()),
            RegistryError::MinimumEntityViolation(_) => ApiError::MinimumEntity(err.to_string()),
            RegistryError::Invalid(_) => ApiError::InvalidRequest(err.to_string()),
            RegistryError::Storage(err) => err.into(),
        }
    }
}

impl From<CollectError> for ApiError {
    fn from(err: CollectError) -> Self {
        match err {
            CollectError::AlreadyRunning(_) => ApiError::AlreadyRunning(err.to_string()),
            CollectError::UnknownEntity(_) => ApiError::NotFound(err.to_string()),
            CollectError::Probe(_) => ApiError::ProbeFailure(err.to_string()),
            CollectError::Store(err) => err.into(),
            CollectError::Registry(err) => err.into(),
            CollectError::ActorStopped | CollectError::Aborted(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::StoreUnavailable(_) => ApiError::StoreUnavailable(err.to_string()),
            QueryError::Store(err) => err.into(),
        }
    }
}

impl From<ModelError> for ApiError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::NotInitialized => ApiError::ModelNotInitialized(err.to_string()),
            ModelError::NotConfigured => ApiError::ModelNotConfigured(err.to_string()),
            ModelError::Unavailable(_) | ModelError::Generation(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}
