//! HTTP endpoints
//!
//! REST API over the pipeline: ask, session lifecycle, health.

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use recipe_chat_agent::Pipeline;
use recipe_chat_config::Settings;
use recipe_chat_core::{AskRequest, AskResponse};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub settings: Arc<Settings>,
    /// Documents available to retrieval, for the health probe.
    pub corpus_size: usize,
}

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/ask", post(ask))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id", delete(delete_session))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run a query through the pipeline.
async fn ask(State(state): State<AppState>, Json(request): Json<AskRequest>) -> Json<AskResponse> {
    Json(state.pipeline.ask(request).await)
}

/// Create a fresh conversation session.
async fn create_session(State(state): State<AppState>) -> Json<serde_json::Value> {
    let session_id = state.pipeline.memory().create_session();
    Json(serde_json::json!({ "session_id": session_id }))
}

/// Inspect a session.
async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let snapshot = state
        .pipeline
        .memory()
        .get_session(&id)
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(serde_json::json!({
        "session_id": snapshot.id,
        "created_at": snapshot.created_at,
        "last_accessed": snapshot.last_accessed,
        "turn_count": snapshot.turn_count,
        "pending_decision": snapshot.pending_decision.is_some(),
    })))
}

/// Drop a session.
async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    state.pipeline.memory().clear_session(&id);
    StatusCode::NO_CONTENT
}

/// Health probe with the effective retrieval configuration.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let settings = &state.settings;
    Json(serde_json::json!({
        "ok": true,
        "collection": settings.collection_name,
        "total_docs": state.corpus_size,
        "k_default": settings.k_default,
        "similarity_threshold": settings.similarity_threshold,
        "domain_cap": settings.domain_cap,
        "use_hybrid_search": settings.use_hybrid_search,
        "ce_rerank_enabled": settings.use_ce_rerank,
        "enable_crag": settings.enable_crag,
        "lowconf_mode": format!("{:?}", settings.lowconf_mode).to_lowercase(),
        "allow_no_context_answer": settings.allow_no_context_answer,
        "status": "ready",
    }))
}
