use super::state::AppState;
use crate::server::{SessionId, SessionStats};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub started_at: DateTime<Utc>,
    pub sessions: Vec<SessionStats>,
}

#[derive(Debug, Serialize)]
pub struct CancelTurnResponse {
    pub session_id: String,
    pub status: String,
    /// Frames that were buffered and are now dropped
    pub dropped_frames: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn unavailable(e: impl std::fmt::Display) -> axum::response::Response {
    error!("Accumulator unavailable: {}", e);
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse {
            error: format!("Accumulator unavailable: {}", e),
        }),
    )
        .into_response()
}

fn not_found(session_id: &str) -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("Session {} not found", session_id),
        }),
    )
        .into_response()
}

/// GET /sessions
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    match state.accumulator.snapshot().await {
        Ok(sessions) => (
            StatusCode::OK,
            Json(SessionListResponse {
                started_at: state.started_at,
                sessions,
            }),
        )
            .into_response(),
        Err(e) => unavailable(e),
    }
}

/// GET /sessions/:session_id
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.accumulator.snapshot().await {
        Ok(sessions) => match sessions
            .into_iter()
            .find(|s| s.session_id.as_str() == session_id)
        {
            Some(stats) => (StatusCode::OK, Json(stats)).into_response(),
            None => not_found(&session_id),
        },
        Err(e) => unavailable(e),
    }
}

/// POST /sessions/:session_id/cancel
/// Drop buffered frames and stop the inactivity timer for a session
pub async fn cancel_turn(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let sessions = match state.accumulator.snapshot().await {
        Ok(sessions) => sessions,
        Err(e) => return unavailable(e),
    };

    let Some(stats) = sessions
        .into_iter()
        .find(|s| s.session_id.as_str() == session_id)
    else {
        return not_found(&session_id);
    };

    info!("Cancelling turn for session: {}", session_id);

    if let Err(e) = state.accumulator.cancel(SessionId::new(session_id.clone())) {
        return unavailable(e);
    }

    (
        StatusCode::OK,
        Json(CancelTurnResponse {
            session_id,
            status: "cancelled".to_string(),
            dropped_frames: stats.buffered_frames,
        }),
    )
        .into_response()
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
