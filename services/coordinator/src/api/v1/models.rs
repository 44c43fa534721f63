//! Model inspection and manual reconciliation.
//!
//! - GET /v1/models/{name}
//! - POST /v1/models/{name}/sync

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use mlplane_proto::agent::v1::ModelDetails;
use mlplane_state::{Model, ModelReplicaState};
use serde::Serialize;
use tracing::error;

use crate::api::error::{header_request_id, ApiError};
use crate::state::AppState;
use crate::sync::SyncReport;

#[derive(Debug, Serialize)]
pub struct ModelResponse {
    pub name: String,
    pub latest_version: Option<u32>,
    pub versions: Vec<ModelVersionResponse>,
}

#[derive(Debug, Serialize)]
pub struct ModelVersionResponse {
    pub version: u32,
    pub details: ModelDetails,
    pub replicas: Vec<ReplicaStateResponse>,
}

#[derive(Debug, Serialize)]
pub struct ReplicaStateResponse {
    pub server_name: String,
    pub replica_idx: u32,
    pub state: ModelReplicaState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<Model> for ModelResponse {
    fn from(model: Model) -> Self {
        let latest_version = model.latest().map(|v| v.version);
        let versions = model
            .versions
            .into_iter()
            .map(|version| ModelVersionResponse {
                version: version.version,
                details: version.details,
                replicas: version
                    .replicas
                    .into_iter()
                    .map(|(key, status)| ReplicaStateResponse {
                        server_name: key.server_name,
                        replica_idx: key.replica_idx,
                        state: status.state,
                        reason: status.reason,
                        updated_at: status.updated_at,
                    })
                    .collect(),
            })
            .collect();

        Self {
            name: model.name,
            latest_version,
            versions,
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/{name}", get(get_model))
        .route("/{name}/sync", post(sync_model))
}

async fn get_model(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ModelResponse>, ApiError> {
    let request_id = header_request_id(&headers);

    match state.server().store().get_model(&name).await {
        Ok(Some(model)) => Ok(Json(model.into())),
        Ok(None) => Err(
            ApiError::not_found("model_not_found", format!("model {name} not found"))
                .with_request_id(request_id),
        ),
        Err(e) => {
            error!(request_id = %request_id, model = %name, error = %e, "Failed to read model");
            Err(ApiError::internal("internal", "failed to read model").with_request_id(request_id))
        }
    }
}

/// Runs one reconciliation pass now instead of waiting for an event.
async fn sync_model(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SyncReport>, ApiError> {
    let report = state.server().sync(&name).await;
    if !report.model_found {
        return Err(
            ApiError::not_found("model_not_found", format!("model {name} not found"))
                .with_request_id(header_request_id(&headers)),
        );
    }
    Ok(Json(report))
}
