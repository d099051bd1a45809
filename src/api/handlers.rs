//! HTTP request handlers

use super::types::{ErrorResponse, FollowResponse, QueuedResponse, SessionResponse};
use super::AppState;
use crate::agent::campaign::CampaignStatus;
use crate::db::FOLLOW_TIME_FORMAT;
use crate::message::{InboundEnvelope, InboundMessage};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::services::ServeDir;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let images = ServeDir::new(&state.image_dir);

    Router::new()
        // Inbound messages from the transport adapter
        .route("/api/messages", post(receive_message))
        // Follow events
        .route("/api/users/:id/follow", post(follow_user))
        // Inspection
        .route("/api/sessions/:id", get(get_session))
        .route("/api/campaign", get(get_campaign))
        .route("/version", get(get_version))
        // Published coupon images
        .nest_service("/downloaded", images)
        .with_state(state)
}

// ============================================================
// Messages
// ============================================================

/// Accept an inbound envelope and dispatch it on its own task
async fn receive_message(
    State(state): State<AppState>,
    Json(envelope): Json<InboundEnvelope>,
) -> Result<(StatusCode, Json<QueuedResponse>), AppError> {
    if envelope.user_id.trim().is_empty() {
        return Err(AppError::BadRequest("userId must not be empty".to_string()));
    }

    let message = InboundMessage::from(envelope);
    let dispatcher = state.dispatcher.clone();
    tokio::spawn(async move {
        let user_id = message.user_id.clone();
        let outcome = dispatcher.dispatch(message).await;
        tracing::debug!(user_id = %user_id, outcome = ?outcome, "Dispatch finished");
    });

    Ok((StatusCode::ACCEPTED, Json(QueuedResponse { queued: true })))
}

// ============================================================
// Follow Events
// ============================================================

async fn follow_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FollowResponse>, AppError> {
    let follow_time = chrono::Utc::now().format(FOLLOW_TIME_FORMAT).to_string();
    let created = state
        .db
        .record_follow(&id, &follow_time)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    tracing::info!(user_id = %id, created, "Follow event");
    Ok(Json(FollowResponse {
        created,
        follow_time,
    }))
}

// ============================================================
// Inspection
// ============================================================

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    let session = state
        .dispatcher
        .sessions()
        .snapshot(&id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("No session for user {id}")))?;

    Ok(Json(SessionResponse::new(id, session)))
}

async fn get_campaign(State(state): State<AppState>) -> Result<Json<CampaignStatus>, AppError> {
    let status = state
        .campaign
        .status()
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(status))
}

async fn get_version() -> &'static str {
    concat!("campaign-bot ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

enum AppError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
