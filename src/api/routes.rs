//! Route Definitions

use super::handlers::*;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        // Operator routes
        .route("/internal/:provider/sessions", post(register_session_handler))
        .route("/internal/:provider/rounds/:round_id", get(round_handler))
        // Provider callbacks
        .route("/:provider/:currency/*rest", post(callback_handler))
        .with_state(state)
}
