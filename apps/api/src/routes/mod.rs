pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::generation::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Generation API
        .route(
            "/api/v1/projects/:project_id/describe",
            post(handlers::handle_describe),
        )
        .route(
            "/api/v1/projects/:project_id/skills",
            get(handlers::handle_list_skills),
        )
        .with_state(state)
}
