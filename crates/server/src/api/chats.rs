//! # Chat API
//!
//! Chat lifecycle endpoints and the stages of a chat.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use conduit_core::state::{Chat, ChatId, ChatWithStages, NewStage, Stage, StageStore};
use serde::Deserialize;
use utoipa::ToSchema;

use super::error::{ApiResult, ErrorBody};
use super::AppState;

/// Request to create a chat
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateChatRequest {
    #[serde(default)]
    pub description: Option<String>,
    /// Create the four canonical stages (default true)
    #[serde(default = "default_true")]
    pub create_default_stages: bool,
}

fn default_true() -> bool {
    true
}

/// Request to change a chat's description
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateChatRequest {
    #[serde(default)]
    pub description: Option<String>,
}

pub fn chat_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_chats).post(create_chat))
        .route(
            "/:id",
            get(get_chat).patch(update_chat).delete(delete_chat),
        )
        .route("/:id/stages", get(list_stages).post(create_stage))
}

/// List chats, newest first
#[utoipa::path(
    get,
    path = "/api/chats",
    tag = "chats",
    responses(
        (status = 200, description = "All chats", body = Vec<Chat>)
    )
)]
pub async fn list_chats(State(state): State<AppState>) -> ApiResult<Json<Vec<Chat>>> {
    Ok(Json(state.sessions.list_chats().await?))
}

/// Create a chat with its pipeline
#[utoipa::path(
    post,
    path = "/api/chats",
    tag = "chats",
    request_body = CreateChatRequest,
    responses(
        (status = 201, description = "Chat created", body = ChatWithStages),
        (status = 400, description = "Malformed body", body = ErrorBody)
    )
)]
pub async fn create_chat(
    State(state): State<AppState>,
    body: Result<Json<CreateChatRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ChatWithStages>)> {
    let Json(req) = body?;
    let chat = state
        .sessions
        .create_chat(req.description, req.create_default_stages)
        .await?;
    Ok((StatusCode::CREATED, Json(chat)))
}

/// Get a chat with its stages in pipeline order
#[utoipa::path(
    get,
    path = "/api/chats/{id}",
    tag = "chats",
    params(("id" = i64, Path, description = "Chat id")),
    responses(
        (status = 200, description = "Chat with stages", body = ChatWithStages),
        (status = 404, description = "No such chat", body = ErrorBody)
    )
)]
pub async fn get_chat(
    State(state): State<AppState>,
    Path(id): Path<ChatId>,
) -> ApiResult<Json<ChatWithStages>> {
    Ok(Json(state.sessions.get_chat(id).await?))
}

/// Change a chat's description
#[utoipa::path(
    patch,
    path = "/api/chats/{id}",
    tag = "chats",
    params(("id" = i64, Path, description = "Chat id")),
    request_body = UpdateChatRequest,
    responses(
        (status = 200, description = "Updated chat", body = Chat),
        (status = 404, description = "No such chat", body = ErrorBody)
    )
)]
pub async fn update_chat(
    State(state): State<AppState>,
    Path(id): Path<ChatId>,
    body: Result<Json<UpdateChatRequest>, JsonRejection>,
) -> ApiResult<Json<Chat>> {
    let Json(req) = body?;
    Ok(Json(state.sessions.rename_chat(id, req.description).await?))
}

/// Delete a chat with all its stages and messages
#[utoipa::path(
    delete,
    path = "/api/chats/{id}",
    tag = "chats",
    params(("id" = i64, Path, description = "Chat id")),
    responses(
        (status = 204, description = "Chat deleted"),
        (status = 404, description = "No such chat", body = ErrorBody)
    )
)]
pub async fn delete_chat(
    State(state): State<AppState>,
    Path(id): Path<ChatId>,
) -> ApiResult<StatusCode> {
    state.sessions.delete_chat(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Stages of a chat in pipeline order
#[utoipa::path(
    get,
    path = "/api/chats/{id}/stages",
    tag = "chats",
    params(("id" = i64, Path, description = "Chat id")),
    responses(
        (status = 200, description = "Stages", body = Vec<Stage>),
        (status = 404, description = "No such chat", body = ErrorBody)
    )
)]
pub async fn list_stages(
    State(state): State<AppState>,
    Path(id): Path<ChatId>,
) -> ApiResult<Json<Vec<Stage>>> {
    Ok(Json(state.store.list_stages(id).await?))
}

/// Append a custom stage to a chat's pipeline
#[utoipa::path(
    post,
    path = "/api/chats/{id}/stages",
    tag = "chats",
    params(("id" = i64, Path, description = "Chat id")),
    request_body = NewStage,
    responses(
        (status = 201, description = "Stage created", body = Stage),
        (status = 400, description = "Missing name", body = ErrorBody),
        (status = 404, description = "No such chat", body = ErrorBody)
    )
)]
pub async fn create_stage(
    State(state): State<AppState>,
    Path(id): Path<ChatId>,
    body: Result<Json<NewStage>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Stage>)> {
    let Json(stage) = body?;
    let stage = state.sessions.add_stage(id, stage).await?;
    Ok((StatusCode::CREATED, Json(stage)))
}
