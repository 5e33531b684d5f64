use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Path, Query, Request, State,
        rejection::JsonRejection,
    },
    http::{Method, header::CONTENT_TYPE},
    middleware::Next,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppState;
use crate::config::AppConfig;
use crate::error::StoreError;
use crate::middleware::{enforce_timeout, rate_limit_middleware};
use crate::session::{
    DocumentBackend, JsonFileBackend, MemoryBackend, PartialTopicTree, SessionDocument,
    SessionStore, UpdatesPage,
};

/// Largest accepted request body. Merge payloads carry whole topics.
const BODY_LIMIT_BYTES: usize = 1024 * 1024;

/// Open the configured backend and session store.
pub async fn build_state(config: Arc<AppConfig>) -> anyhow::Result<AppState> {
    let backend: Arc<dyn DocumentBackend> = match config.store.provider.as_str() {
        "memory" => Arc::new(MemoryBackend),
        _ => Arc::new(
            JsonFileBackend::new(&config.store.data_dir)
                .await
                .with_context(|| format!("Failed to open data dir {}", config.store.data_dir))?,
        ),
    };

    info!(
        name: "store.config.loaded",
        provider = %config.store.provider,
        data_dir = %config.store.data_dir,
        reset_on_start = config.store.reset_on_start,
        "Store configuration loaded"
    );

    let sessions = SessionStore::open(backend, &config.store_options())
        .await
        .context("Failed to open session store")?;

    Ok(AppState::new(config, sessions))
}

/// Build the HTTP router with its middleware stack.
pub fn router(state: AppState) -> Router {
    let timeout = state.config.request_timeout();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/health", get(health))
        .route("/api/sessions", get(api_list_sessions).post(api_create_session))
        .route("/api/sessions/{id}/topics", get(api_get_snapshot))
        .route("/sessions/{id}/topics.json", get(api_get_snapshot))
        .route("/api/topics", post(api_create_topic))
        .route("/api/topics/end", post(api_end_topic))
        .route("/api/inputs", post(api_append_input))
        .route("/api/merge", post(api_merge_update))
        .route("/api/updates", get(api_get_updates))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(axum::middleware::from_fn(move |req: Request, next: Next| {
            enforce_timeout(timeout, req, next)
        }))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .with_state(state)
}

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let state = build_state(Arc::clone(&config)).await?;
    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(name: "server.stopped", "Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

fn invalid_body(rejection: &JsonRejection) -> StoreError {
    StoreError::InvalidArgument(rejection.body_text())
}

fn require(value: Option<String>, field: &str) -> Result<String, StoreError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| StoreError::InvalidArgument(format!("{field} is required")))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    sessions: usize,
}

/// GET /health
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: state.sessions.len(),
    })
}

#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    success: bool,
    session_id: String,
}

/// POST /api/sessions - Create a session from a display name.
async fn api_create_session(
    State(state): State<AppState>,
    payload: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<Json<CreateSessionResponse>, StoreError> {
    let Json(req) = payload.map_err(|e| invalid_body(&e))?;
    let name = require(req.name, "name")?;

    let session_id = state.sessions.create_session(&name).await?;
    Ok(Json(CreateSessionResponse {
        success: true,
        session_id,
    }))
}

#[derive(Debug, Serialize)]
struct SessionListResponse {
    sessions: Vec<String>,
}

/// GET /api/sessions - List live session ids.
async fn api_list_sessions(State(state): State<AppState>) -> Json<SessionListResponse> {
    Json(SessionListResponse {
        sessions: state.sessions.list_ids(),
    })
}

/// GET /api/sessions/{id}/topics - Current topic document for pollers.
async fn api_get_snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Arc<SessionDocument>>, StoreError> {
    Ok(Json(state.sessions.snapshot(&id)?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TopicRequest {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    topic_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TopicResponse {
    success: bool,
    topic_name: String,
}

/// POST /api/topics - Create a topic.
async fn api_create_topic(
    State(state): State<AppState>,
    payload: Result<Json<TopicRequest>, JsonRejection>,
) -> Result<Json<TopicResponse>, StoreError> {
    let Json(req) = payload.map_err(|e| invalid_body(&e))?;
    let session_id = require(req.session_id, "sessionId")?;
    let topic_name = require(req.topic_name, "topicName")?;

    let topic_name = state
        .sessions
        .create_topic(&session_id, &topic_name)
        .await?;
    Ok(Json(TopicResponse {
        success: true,
        topic_name,
    }))
}

/// POST /api/topics/end - Stop a topic from accepting inputs.
async fn api_end_topic(
    State(state): State<AppState>,
    payload: Result<Json<TopicRequest>, JsonRejection>,
) -> Result<Json<TopicResponse>, StoreError> {
    let Json(req) = payload.map_err(|e| invalid_body(&e))?;
    let session_id = require(req.session_id, "sessionId")?;
    let topic_name = require(req.topic_name, "topicName")?;

    let topic_name = state.sessions.end_topic(&session_id, &topic_name).await?;
    Ok(Json(TopicResponse {
        success: true,
        topic_name,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendInputRequest {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    topic_name: Option<String>,
    #[serde(default)]
    subtopic_name: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AppendInputResponse {
    success: bool,
    total_inputs: usize,
}

/// POST /api/inputs - Append an attendee input.
async fn api_append_input(
    State(state): State<AppState>,
    payload: Result<Json<AppendInputRequest>, JsonRejection>,
) -> Result<Json<AppendInputResponse>, StoreError> {
    let Json(req) = payload.map_err(|e| invalid_body(&e))?;
    let session_id = require(req.session_id, "sessionId")?;
    let topic_name = require(req.topic_name, "topicName")?;
    let text = require(req.text, "text")?;

    let total_inputs = state
        .sessions
        .append_input(
            &session_id,
            &topic_name,
            req.subtopic_name.as_deref(),
            &text,
        )
        .await?;
    Ok(Json(AppendInputResponse {
        success: true,
        total_inputs,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MergeUpdateRequest {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    partial_topic_tree: Option<PartialTopicTree>,
}

#[derive(Debug, Serialize)]
struct SuccessResponse {
    success: bool,
}

/// POST /api/merge - Replace whole topics with aggregator output.
async fn api_merge_update(
    State(state): State<AppState>,
    payload: Result<Json<MergeUpdateRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, StoreError> {
    let Json(req) = payload.map_err(|e| invalid_body(&e))?;
    let session_id = require(req.session_id, "sessionId")?;
    let partial = req
        .partial_topic_tree
        .ok_or_else(|| StoreError::InvalidArgument("partialTopicTree is required".to_string()))?;

    state.sessions.merge_update(&session_id, partial).await?;
    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Debug, Deserialize)]
struct UpdatesQuery {
    #[serde(default)]
    since: u64,
}

/// GET /api/updates?since=N - Changes committed after sequence `N`.
async fn api_get_updates(
    State(state): State<AppState>,
    Query(query): Query<UpdatesQuery>,
) -> Json<UpdatesPage> {
    Json(state.sessions.updates().since(query.since))
}
