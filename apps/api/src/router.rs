use axum::{
    Router,
    routing::get,
};

use conversation_cell::{create_conversation_router, AppState};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "Booking assistant API is running!" }))
        .merge(create_conversation_router(state))
}
