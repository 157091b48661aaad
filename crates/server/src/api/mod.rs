//! # HTTP Surface
//!
//! JSON routes under `/api` plus the `/ws` push channel.

pub mod chats;
pub mod error;
pub mod stages;
pub mod ws;

use axum::{
    http::{header, Method},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use conduit_core::pipeline::{ApprovalOutcome, Notifier, Orchestrator, SubmitOutcome};
use conduit_core::sessions::ChatSessions;
use conduit_core::state::{
    Chat, ChatWithStages, Message, NewStage, PipelineStore, Role, Stage, StageStatus,
    StageUpdate,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::{OpenApi, ToSchema};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PipelineStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub sessions: ChatSessions,
    pub notifier: Notifier,
}

impl AppState {
    pub fn new(store: Arc<dyn PipelineStore>, orchestrator: Orchestrator) -> Self {
        let notifier = orchestrator.notifier().clone();
        Self {
            sessions: ChatSessions::new(store.clone()),
            store,
            orchestrator: Arc::new(orchestrator),
            notifier,
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Conduit API",
        version = "0.1.0",
        description = "Approval-gated stage pipeline for agent conversations"
    ),
    paths(
        health,
        chats::list_chats,
        chats::create_chat,
        chats::get_chat,
        chats::update_chat,
        chats::delete_chat,
        chats::list_stages,
        chats::create_stage,
        stages::get_stage,
        stages::update_stage,
        stages::list_messages,
        stages::submit_message,
        stages::approve_stage,
        stages::reject_stage,
    ),
    components(
        schemas(
            Chat,
            ChatWithStages,
            Stage,
            StageStatus,
            StageUpdate,
            NewStage,
            Message,
            Role,
            SubmitOutcome,
            ApprovalOutcome,
            HealthResponse,
            chats::CreateChatRequest,
            chats::UpdateChatRequest,
            stages::SubmitMessageRequest,
            error::ErrorBody
        )
    ),
    tags(
        (name = "chats", description = "Chat lifecycle"),
        (name = "stages", description = "Stage conversations and approval"),
        (name = "system", description = "Liveness and API description")
    )
)]
pub struct ApiDoc;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Liveness probe
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "system",
    responses(
        (status = 200, description = "Server is up", body = HealthResponse)
    )
)]
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn serve_openapi() -> impl IntoResponse {
    let spec = ApiDoc::openapi().to_json().unwrap_or_default();
    ([(header::CONTENT_TYPE, "application/json")], spec)
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .nest("/chats", chats::chat_routes())
        .nest("/stages", stages::stage_routes())
        .route("/health", get(health))
        .route("/openapi.json", get(serve_openapi));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .nest("/api", api)
        .route("/ws", get(ws::stage_events_socket))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use conduit_core::pipeline::{OrchestratorSettings, SimulatedGateway};
    use conduit_core::state::MemoryStore;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_app() -> Router {
        let store: Arc<dyn PipelineStore> = Arc::new(MemoryStore::new());
        let orchestrator = Orchestrator::new(
            store.clone(),
            Arc::new(SimulatedGateway::new()),
            Notifier::new(16),
            OrchestratorSettings::default(),
        );
        router(AppState::new(store, orchestrator))
    }

    async fn send(app: &Router, method: Method, path: &str, body: Option<Value>) -> (StatusCode, Value) {
        let body = match body {
            Some(json) => Body::from(serde_json::to_string(&json).unwrap()),
            None => Body::empty(),
        };
        let req = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();

        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn create_chat(app: &Router) -> Value {
        let (status, chat) = send(
            app,
            Method::POST,
            "/api/chats",
            Some(json!({"description": "Expense tracker"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        chat
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app();
        let (status, body) = send(&app, Method::GET, "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_create_chat_with_default_stages() {
        let app = test_app();
        let chat = create_chat(&app).await;

        assert_eq!(chat["description"], "Expense tracker");
        let stages = chat["stages"].as_array().unwrap();
        assert_eq!(stages.len(), 4);
        assert_eq!(stages[0]["name"], "Requirements Gathering");
        assert_eq!(stages[0]["status"], "not_started");
        assert_eq!(stages[0]["next_stage_id"], stages[1]["id"]);

        let (status, chats) = send(&app, Method::GET, "/api/chats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(chats.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_submit_approve_flow() {
        let app = test_app();
        let chat = create_chat(&app).await;
        let first = chat["stages"][0]["id"].as_i64().unwrap();
        let second = chat["stages"][1]["id"].as_i64().unwrap();
        let messages_path = format!("/api/stages/{}/messages", first);

        let (status, outcome) = send(
            &app,
            Method::POST,
            &messages_path,
            Some(json!({"content": "I need an expense tracker"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["approval_needed"], false);
        assert_eq!(outcome["stage"]["status"], "in_progress");
        assert_eq!(outcome["messages"][0]["role"], "user");
        assert_eq!(outcome["messages"][1]["role"], "agent");

        let (_, outcome) = send(
            &app,
            Method::POST,
            &messages_path,
            Some(json!({"content": "Yes, that's correct"})),
        )
        .await;
        assert_eq!(outcome["approval_needed"], true);
        assert_eq!(outcome["stage"]["status"], "waiting_for_approval");

        let (status, approved) = send(
            &app,
            Method::POST,
            &format!("/api/stages/{}/approve", first),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(approved["stage"]["status"], "completed");
        assert!(approved["stage"]["requirements_summary"]
            .as_str()
            .unwrap()
            .contains("I need an expense tracker"));
        assert_eq!(approved["next_stage"]["id"], second);
        assert_eq!(approved["next_stage"]["status"], "in_progress");

        let (_, seeded) = send(
            &app,
            Method::GET,
            &format!("/api/stages/{}/messages", second),
            None,
        )
        .await;
        assert_eq!(seeded.as_array().unwrap().len(), 1);
        assert_eq!(
            seeded[0]["content"],
            "Starting Technical Specification. How would you like to proceed?"
        );

        let (status, body) = send(&app, Method::POST, &messages_path, Some(json!({"content": "more"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "conflict");
    }

    #[tokio::test]
    async fn test_approve_requires_waiting_stage() {
        let app = test_app();
        let chat = create_chat(&app).await;
        let first = chat["stages"][0]["id"].as_i64().unwrap();

        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/api/stages/{}/approve", first),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "conflict");
    }

    #[tokio::test]
    async fn test_unknown_stage_is_404() {
        let app = test_app();
        let (status, body) = send(&app, Method::GET, "/api/stages/999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/stages/999/messages",
            Some(json!({"content": "hello"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_body_is_400() {
        let app = test_app();
        let chat = create_chat(&app).await;
        let first = chat["stages"][0]["id"].as_i64().unwrap();

        let req = Request::builder()
            .method(Method::POST)
            .uri(format!("/api/stages/{}/messages", first))
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/api/stages/{}/messages", first),
            Some(json!({"content": ""})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation");
    }

    #[tokio::test]
    async fn test_patch_stage_and_chat() {
        let app = test_app();
        let chat = create_chat(&app).await;
        let chat_id = chat["id"].as_i64().unwrap();
        let stage = chat["stages"][2]["id"].as_i64().unwrap();

        let (status, updated) = send(
            &app,
            Method::PATCH,
            &format!("/api/stages/{}", stage),
            Some(json!({"status": "error", "description": "agent crashed"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["status"], "error");
        assert_eq!(updated["description"], "agent crashed");

        let (status, _) = send(
            &app,
            Method::PATCH,
            &format!("/api/stages/{}", stage),
            Some(json!({"status": "inProgress"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, renamed) = send(
            &app,
            Method::PATCH,
            &format!("/api/chats/{}", chat_id),
            Some(json!({"description": "Budget app"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(renamed["description"], "Budget app");
    }

    #[tokio::test]
    async fn test_custom_stage_appended() {
        let app = test_app();
        let chat = create_chat(&app).await;
        let chat_id = chat["id"].as_i64().unwrap();

        let (status, stage) = send(
            &app,
            Method::POST,
            &format!("/api/chats/{}/stages", chat_id),
            Some(json!({"name": "Deployment"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(stage["position"], 4);

        let (_, stages) = send(
            &app,
            Method::GET,
            &format!("/api/chats/{}/stages", chat_id),
            None,
        )
        .await;
        assert_eq!(stages.as_array().unwrap().len(), 5);
        assert_eq!(stages[3]["next_stage_id"], stage["id"]);
    }

    #[tokio::test]
    async fn test_delete_chat() {
        let app = test_app();
        let chat = create_chat(&app).await;
        let path = format!("/api/chats/{}", chat["id"]);
        let stage_path = format!("/api/stages/{}", chat["stages"][0]["id"]);

        let (status, _) = send(&app, Method::DELETE, &path, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(&app, Method::GET, &path, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, Method::GET, &stage_path, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, Method::DELETE, &path, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_openapi_document() {
        let app = test_app();
        let (status, doc) = send(&app, Method::GET, "/api/openapi.json", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(doc["paths"]["/api/stages/{id}/approve"].is_object());
    }
}
