use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;

use crate::handlers::{
    cancel_conversation, get_availability, get_conversation, health_check, post_turn,
    reset_conversation, start_conversation,
};
use crate::services::ConversationService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub conversations: Arc<ConversationService>,
}

pub fn create_conversation_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/conversations", post(start_conversation))
        .route("/conversations/{session_id}", get(get_conversation))
        .route("/conversations/{session_id}/turns", post(post_turn))
        .route("/conversations/{session_id}/cancel", post(cancel_conversation))
        .route("/conversations/{session_id}/reset", post(reset_conversation))
        .route("/doctors/{doctor_id}/availability", get(get_availability))
        .with_state(state)
}
