//! Application state shared across request handlers.

use std::sync::Arc;

use mlplane_events::ModelEventHub;

use crate::server::AgentServer;

/// Passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    server: AgentServer,
    events: Arc<ModelEventHub>,
}

impl AppState {
    pub fn new(server: AgentServer, events: Arc<ModelEventHub>) -> Self {
        Self {
            inner: Arc::new(AppStateInner { server, events }),
        }
    }

    pub fn server(&self) -> &AgentServer {
        &self.inner.server
    }

    pub fn events(&self) -> &ModelEventHub {
        &self.inner.events
    }
}
