//! API v1 routes.

mod agent;
mod agents;
mod models;

use axum::Router;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        // Replica-facing protocol
        .nest("/agent", agent::routes())
        // Operator surface
        .nest("/agents", agents::routes())
        .nest("/models", models::routes())
}
