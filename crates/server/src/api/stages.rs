//! # Stage API
//!
//! Stage reads, message submission and the approval transitions.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::{get, post},
    Json, Router,
};
use conduit_core::pipeline::{ApprovalOutcome, SubmitOutcome};
use conduit_core::state::{Message, MessageStore, Role, Stage, StageId, StageStore, StageUpdate};
use serde::Deserialize;
use utoipa::ToSchema;

use super::error::{ApiResult, ErrorBody};
use super::AppState;

/// A message submitted to a stage
#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitMessageRequest {
    /// Defaults to "user"; other roles are stored without an agent call
    #[serde(default)]
    pub role: Role,
    pub content: String,
}

pub fn stage_routes() -> Router<AppState> {
    Router::new()
        .route("/:id", get(get_stage).patch(update_stage))
        .route("/:id/messages", get(list_messages).post(submit_message))
        .route("/:id/approve", post(approve_stage))
        .route("/:id/reject", post(reject_stage))
}

#[utoipa::path(
    get,
    path = "/api/stages/{id}",
    tag = "stages",
    params(("id" = i64, Path, description = "Stage id")),
    responses(
        (status = 200, description = "Stage", body = Stage),
        (status = 404, description = "No such stage", body = ErrorBody)
    )
)]
pub async fn get_stage(
    State(state): State<AppState>,
    Path(id): Path<StageId>,
) -> ApiResult<Json<Stage>> {
    Ok(Json(state.store.get_stage(id).await?))
}

/// Partial update of a stage's fields
#[utoipa::path(
    patch,
    path = "/api/stages/{id}",
    tag = "stages",
    params(("id" = i64, Path, description = "Stage id")),
    request_body = StageUpdate,
    responses(
        (status = 200, description = "Updated stage", body = Stage),
        (status = 400, description = "Empty or malformed update", body = ErrorBody),
        (status = 404, description = "No such stage", body = ErrorBody)
    )
)]
pub async fn update_stage(
    State(state): State<AppState>,
    Path(id): Path<StageId>,
    body: Result<Json<StageUpdate>, JsonRejection>,
) -> ApiResult<Json<Stage>> {
    let Json(update) = body?;
    Ok(Json(state.orchestrator.update_stage(id, update).await?))
}

/// Messages of a stage in creation order
#[utoipa::path(
    get,
    path = "/api/stages/{id}/messages",
    tag = "stages",
    params(("id" = i64, Path, description = "Stage id")),
    responses(
        (status = 200, description = "Messages", body = Vec<Message>),
        (status = 404, description = "No such stage", body = ErrorBody)
    )
)]
pub async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<StageId>,
) -> ApiResult<Json<Vec<Message>>> {
    Ok(Json(state.store.list_messages(id).await?))
}

/// Submit a message and wait for the agent's reply
#[utoipa::path(
    post,
    path = "/api/stages/{id}/messages",
    tag = "stages",
    params(("id" = i64, Path, description = "Stage id")),
    request_body = SubmitMessageRequest,
    responses(
        (status = 200, description = "Stored messages and the updated stage", body = SubmitOutcome),
        (status = 400, description = "Empty content or missing endpoint", body = ErrorBody),
        (status = 404, description = "No such stage", body = ErrorBody),
        (status = 409, description = "Stage is completed", body = ErrorBody),
        (status = 502, description = "Agent gateway failed", body = ErrorBody),
        (status = 504, description = "Agent gateway timed out", body = ErrorBody)
    )
)]
pub async fn submit_message(
    State(state): State<AppState>,
    Path(id): Path<StageId>,
    body: Result<Json<SubmitMessageRequest>, JsonRejection>,
) -> ApiResult<Json<SubmitOutcome>> {
    let Json(req) = body?;
    let outcome = state
        .orchestrator
        .submit_message(id, req.role, req.content)
        .await?;
    Ok(Json(outcome))
}

/// Approve a stage and start the next one
#[utoipa::path(
    post,
    path = "/api/stages/{id}/approve",
    tag = "stages",
    params(("id" = i64, Path, description = "Stage id")),
    responses(
        (status = 200, description = "Completed stage and its started successor", body = ApprovalOutcome),
        (status = 404, description = "No such stage", body = ErrorBody),
        (status = 409, description = "Stage is not waiting for approval", body = ErrorBody)
    )
)]
pub async fn approve_stage(
    State(state): State<AppState>,
    Path(id): Path<StageId>,
) -> ApiResult<Json<ApprovalOutcome>> {
    Ok(Json(state.orchestrator.approve(id).await?))
}

/// Send a stage back to the agent for changes
#[utoipa::path(
    post,
    path = "/api/stages/{id}/reject",
    tag = "stages",
    params(("id" = i64, Path, description = "Stage id")),
    responses(
        (status = 200, description = "Stage back in progress", body = Stage),
        (status = 404, description = "No such stage", body = ErrorBody),
        (status = 409, description = "Stage is not waiting for approval", body = ErrorBody)
    )
)]
pub async fn reject_stage(
    State(state): State<AppState>,
    Path(id): Path<StageId>,
) -> ApiResult<Json<Stage>> {
    Ok(Json(state.orchestrator.reject(id).await?))
}
