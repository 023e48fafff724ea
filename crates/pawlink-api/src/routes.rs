use axum::{
    Json, Router,
    routing::{get, post, put},
};
use serde_json::{Value, json};

use crate::state::AppState;
use crate::{adoptions, conversations, messages};

/// REST surface of the chat subsystem. The live channel is mounted by the
/// server binary next to it.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/conversations", get(conversations::list_conversations))
        .route(
            "/conversations/by-adoption/{adoption_id}",
            get(conversations::by_adoption),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            get(conversations::get_history),
        )
        .route(
            "/conversations/{conversation_id}/read",
            put(conversations::mark_read),
        )
        .route("/messages", post(messages::send_message))
        .route("/adoptions/{adoption_id}/status", put(adoptions::update_status))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
