//! Natural-language query and model session endpoints

use axum::{Json, extract::State};

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{InitModelResponse, QueryRequest},
};
use crate::query::{InitOutcome, ModelState, QueryAnswer};

/// POST /api/query
///
/// Answers are always produced; an unreadable question gets the overview.
pub async fn query(
    State(state): State<ApiState>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<Json<QueryAnswer>> {
    if request.question.trim().is_empty() {
        return Err(ApiError::InvalidRequest(
            "question must not be empty".to_string(),
        ));
    }

    let answer = state.engine.answer(&request.question).await?;
    Ok(Json(answer))
}

/// GET /api/model-status
pub async fn model_status(State(state): State<ApiState>) -> Json<ModelState> {
    Json(state.engine.model().state())
}

/// POST /api/init-model
///
/// Warms the model up in this request; concurrent calls wait for the first.
pub async fn init_model(State(state): State<ApiState>) -> ApiResult<Json<InitModelResponse>> {
    let model = state.engine.model();
    let outcome = model.initialize().await?;

    let message = match outcome {
        InitOutcome::Initialized => "language model initialized",
        InitOutcome::AlreadyInitialized => "language model already initialized",
    };

    Ok(Json(InitModelResponse {
        message: message.to_string(),
        outcome,
        model_status: model.state(),
    }))
}
