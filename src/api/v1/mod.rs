//! Versioned workflow API

pub mod workflows;

use axum::{
    routing::{get, post},
    Router,
};

use super::state::AppState;

/// Create v1 API router
pub fn create_v1_router() -> Router<AppState> {
    Router::new()
        .route("/workflows", post(workflows::create_workflow))
        .route("/workflows/{workflow_id}", get(workflows::get_workflow))
        .route(
            "/workflows/{workflow_id}/executions",
            post(workflows::start_execution),
        )
        .route(
            "/workflows/{workflow_id}/executions/{user_id}/{call_id}",
            get(workflows::get_execution),
        )
        .route(
            "/workflows/{workflow_id}/executions/{user_id}/{call_id}/message",
            get(workflows::get_current_message),
        )
        .route(
            "/workflows/{workflow_id}/executions/{user_id}/{call_id}/updates",
            post(workflows::process_update),
        )
}
