use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub mod conversations;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/conversations",
            post(conversations::create_or_get).get(conversations::list),
        )
        .route("/api/conversations/:id", get(conversations::get_detail))
        .route(
            "/api/conversations/:id/messages",
            post(conversations::send_message),
        )
        .route(
            "/api/conversations/:id/read",
            post(conversations::mark_read),
        )
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}
