// libs/conversation-cell/src/handlers.rs
use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde_json::{json, Value};
use tracing::{debug, info};

use shared_models::AppError;

use crate::models::{AvailabilityQuery, DayAvailability, SessionSnapshot, TurnReply, TurnRequest};
use crate::router::AppState;

/// Open a new conversation and return the greeting
pub async fn start_conversation(
    State(state): State<AppState>,
) -> Result<Json<TurnReply>, AppError> {
    let reply = state.conversations.start_session().await?;
    info!("Conversation {} opened", reply.session_id);
    Ok(Json(reply))
}

/// Apply one patient utterance to a conversation
pub async fn post_turn(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<TurnRequest>,
) -> Result<Json<TurnReply>, AppError> {
    debug!("Turn for conversation {}", session_id);

    let reply = state
        .conversations
        .handle_turn(&session_id, &request.utterance, request.history)
        .await?;

    Ok(Json(reply))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let session = state.conversations.get_session(&session_id).await?;
    Ok(Json(SessionSnapshot::from(&session)))
}

pub async fn cancel_conversation(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<TurnReply>, AppError> {
    info!("Cancel requested for conversation {}", session_id);
    let reply = state.conversations.cancel(&session_id).await?;
    Ok(Json(reply))
}

pub async fn reset_conversation(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<TurnReply>, AppError> {
    info!("Reset requested for conversation {}", session_id);
    let reply = state.conversations.reset(&session_id).await?;
    Ok(Json(reply))
}

/// Free slots for one doctor on one day, read-only
pub async fn get_availability(
    State(state): State<AppState>,
    Path(doctor_id): Path<String>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<DayAvailability>, AppError> {
    let availability = state.conversations.availability(&doctor_id, query.date).await?;
    Ok(Json(availability))
}

/// Liveness plus which backends are wired in
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "booking-assistant",
        "session_store": state.conversations.store().backend_name(),
        "calendar": state.conversations.calendar_backend(),
        "external_backends_configured": state.config.is_configured(),
        "timestamp": state.conversations.clock().now().to_rfc3339(),
    }))
}
