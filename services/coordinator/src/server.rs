//! The agent-facing server: the coordinator's collaborators wired together.

use std::sync::Arc;
use std::time::Duration;

use mlplane_events::EventSource;
use mlplane_id::ReplicaKey;
use mlplane_proto::agent::v1::{
    AgentSubscribeRequest, ModelEventMessage, ModelEventResponse, ModelOperationMessage,
};
use mlplane_state::{ModelStore, Scheduler};
use tokio::sync::mpsc;
use tracing::info;

use crate::dispatcher::SyncDispatcher;
use crate::error::CoordinatorResult;
use crate::handler::ConnectionHandler;
use crate::registry::AgentRegistry;
use crate::report;
use crate::sink::{ChannelSink, CommandSink};
use crate::sync::{SyncEngine, SyncReport};

/// Name of the listener the server registers on the event source.
pub const EVENT_LISTENER: &str = "agent-server";

#[derive(Debug, Clone)]
pub struct AgentServerOptions {
    pub send_timeout: Duration,
    pub command_buffer: usize,
    pub event_buffer: usize,
}

impl Default for AgentServerOptions {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(5),
            command_buffer: 64,
            event_buffer: 1024,
        }
    }
}

/// Cheap to clone; every clone shares the same registry and collaborators.
#[derive(Clone)]
pub struct AgentServer {
    store: Arc<dyn ModelStore>,
    scheduler: Arc<dyn Scheduler>,
    registry: Arc<AgentRegistry>,
    sync: Arc<SyncEngine>,
    options: AgentServerOptions,
}

impl AgentServer {
    pub fn new(
        store: Arc<dyn ModelStore>,
        scheduler: Arc<dyn Scheduler>,
        options: AgentServerOptions,
    ) -> Self {
        let registry = Arc::new(AgentRegistry::new());
        let sync = Arc::new(SyncEngine::new(store.clone(), registry.clone()));
        Self {
            store,
            scheduler,
            registry,
            sync,
            options,
        }
    }

    /// Registers this server's listener on `events`. The returned dispatcher
    /// must be run for events to trigger reconciliation.
    pub fn dispatcher(&self, events: &dyn EventSource) -> SyncDispatcher {
        let receiver = events.subscribe(EVENT_LISTENER, self.options.event_buffer);
        info!(listener = EVENT_LISTENER, capacity = self.options.event_buffer, "Registered model event listener");
        SyncDispatcher::new(receiver, self.sync.clone())
    }

    /// Outbound queue for one replica stream, sized and timed per options.
    pub fn command_channel(&self) -> (ChannelSink, mpsc::Receiver<ModelOperationMessage>) {
        ChannelSink::channel(self.options.command_buffer, self.options.send_timeout)
    }

    /// Accepts a replica subscription. The returned handler is active and
    /// must be [run](ConnectionHandler::run) until the stream ends.
    pub async fn subscribe(
        &self,
        request: &AgentSubscribeRequest,
        sink: Box<dyn CommandSink>,
    ) -> CoordinatorResult<ConnectionHandler> {
        ConnectionHandler::connect(self.clone(), request, sink).await
    }

    /// Records a replica's status report.
    pub async fn agent_event(
        &self,
        message: &ModelEventMessage,
    ) -> CoordinatorResult<ModelEventResponse> {
        report::ingest(self.store.as_ref(), message).await?;
        Ok(ModelEventResponse {})
    }

    /// Runs one reconciliation pass for `model_name`.
    pub async fn sync(&self, model_name: &str) -> SyncReport {
        self.sync.sync(model_name).await
    }

    /// Sends the explicit close signal to the connection of `replica`.
    pub async fn close(&self, replica: &ReplicaKey) -> bool {
        self.registry.close(replica).await
    }

    pub async fn close_all(&self) -> usize {
        let closed = self.registry.close_all().await;
        info!(closed, "Closed all replica streams");
        closed
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn store(&self) -> &dyn ModelStore {
        self.store.as_ref()
    }

    pub(crate) fn scheduler(&self) -> &dyn Scheduler {
        self.scheduler.as_ref()
    }

    pub(crate) fn sync_engine(&self) -> &SyncEngine {
        &self.sync
    }
}
