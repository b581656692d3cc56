//! API routes for helpdeskd

use crate::feedback::submit_feedback;
use crate::orchestrator::run_chain;
use crate::server::AppState;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use helpdesk_shared::{
    ChainError, ChatRequest, ChatResponse, ErrorResponse, FeedbackRequest, FeedbackResponse,
    HealthResponse, VERSION,
};
use std::sync::Arc;
use tracing::{error, info};

type AppStateArc = Arc<AppState>;

fn error_status(e: &ChainError) -> StatusCode {
    match e {
        ChainError::FlagBackend(_) | ChainError::Model(_) | ChainError::Http(_) => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ============================================================================
// Chat Routes
// ============================================================================

pub fn chat_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream))
}

/// Run the chain and answer with the terminal response only
async fn chat(
    State(state): State<AppStateArc>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, Json<ErrorResponse>)> {
    info!("[CHAT]  Session {}: {}", req.session_id, req.message);

    run_chain(state.deps.clone(), req)
        .into_response()
        .await
        .map(Json)
        .map_err(|e| {
            error!("[CHAT]  Run failed: {}", e);
            (
                error_status(&e),
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
        })
}

/// Run the chain and stream step events as they happen
async fn chat_stream(State(state): State<AppStateArc>, Json(req): Json<ChatRequest>) -> Response {
    info!("[STREAM]  Session {}: {}", req.session_id, req.message);

    let frames = run_chain(state.deps.clone(), req).into_sse_frames();
    let headers = [
        (header::CONTENT_TYPE, "text/event-stream"),
        (header::CACHE_CONTROL, "no-cache"),
        (HeaderName::from_static("x-accel-buffering"), "no"),
    ];
    (headers, Body::from_stream(frames)).into_response()
}

// ============================================================================
// Feedback Routes
// ============================================================================

pub fn feedback_routes() -> Router<AppStateArc> {
    Router::new().route("/feedback", post(feedback))
}

async fn feedback(
    State(state): State<AppStateArc>,
    Json(req): Json<FeedbackRequest>,
) -> Json<FeedbackResponse> {
    let tracked = submit_feedback(
        &state.deps.trackers,
        &state.deps.metrics,
        &req.response_id,
        req.kind,
    )
    .await;
    Json(FeedbackResponse { tracked })
}

// ============================================================================
// Health Routes
// ============================================================================

pub fn health_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
}

async fn health_check(State(state): State<AppStateArc>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: VERSION.to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        flags_ready: state.flags.is_ready().await,
        sessions: state.deps.sessions.len().await,
        trackers: state.deps.trackers.len().await,
    })
}

async fn metrics(State(state): State<AppStateArc>) -> Response {
    match state.deps.metrics.encode() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
