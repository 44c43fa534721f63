//! Health check endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// "ok" or "degraded".
    pub status: String,
    pub service: String,
    pub version: String,
    /// RFC 3339.
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<ComponentHealth>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ComponentHealth {
    pub event_source: ComponentStatus,
    pub connected_replicas: usize,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ComponentStatus {
    /// "ok" or "unavailable".
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/livez", get(livez))
}

async fn healthz() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "coordinator".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        components: None,
    })
}

/// 503 once the event source is closed, since reconciliation has stopped.
async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let events_ok = !state.events().is_closed();
    let components = ComponentHealth {
        event_source: ComponentStatus {
            status: if events_ok { "ok" } else { "unavailable" }.to_string(),
            message: (!events_ok).then(|| "event hub is closed".to_string()),
        },
        connected_replicas: state.server().registry().len().await,
    };

    let response = HealthResponse {
        status: if events_ok { "ok" } else { "degraded" }.to_string(),
        service: "coordinator".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        components: Some(components),
    };

    if events_ok {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

async fn livez() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use mlplane_events::ModelEventHub;
    use mlplane_state::MemoryStore;
    use mlplane_testing::RecordingScheduler;
    use tower::ServiceExt;

    use crate::server::{AgentServer, AgentServerOptions};

    fn app(events: Arc<ModelEventHub>) -> Router {
        let server = AgentServer::new(
            Arc::new(MemoryStore::new()),
            Arc::new(RecordingScheduler::new()),
            AgentServerOptions::default(),
        );
        routes().with_state(AppState::new(server, events))
    }

    async fn get_status(app: Router, uri: &str) -> StatusCode {
        app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_healthz_returns_ok() {
        let response = healthz().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_livez_returns_ok() {
        let response = livez().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readyz_tracks_event_hub() {
        let events = Arc::new(ModelEventHub::new());
        assert_eq!(get_status(app(events.clone()), "/readyz").await, StatusCode::OK);

        events.close();
        assert_eq!(
            get_status(app(events), "/readyz").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
