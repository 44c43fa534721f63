//! Connected replica endpoints.
//!
//! - GET /v1/agents
//! - DELETE /v1/agents/{server_name}/{replica_idx}

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get},
    Json, Router,
};
use mlplane_id::ReplicaKey;
use serde::Serialize;
use tracing::info;

use crate::api::error::{header_request_id, ApiError};
use crate::registry::AgentInfo;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ListAgentsResponse {
    pub items: Vec<AgentInfo>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_agents))
        .route("/{server_name}/{replica_idx}", delete(close_agent))
}

async fn list_agents(State(state): State<AppState>) -> Json<ListAgentsResponse> {
    Json(ListAgentsResponse {
        items: state.server().registry().snapshot().await,
    })
}

/// Closes exactly one replica stream. The replica's assignments are kept.
async fn close_agent(
    State(state): State<AppState>,
    Path((server_name, replica_idx)): Path<(String, u32)>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let request_id = header_request_id(&headers);
    let replica = ReplicaKey::new(server_name, replica_idx);

    if !state.server().close(&replica).await {
        return Err(ApiError::not_found(
            "agent_not_connected",
            format!("replica {replica} is not connected"),
        )
        .with_request_id(request_id));
    }

    info!(request_id = %request_id, replica = %replica, "Replica stream closed by operator");
    Ok(StatusCode::NO_CONTENT)
}
