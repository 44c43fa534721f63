//! Turns model events into reconciliation passes.

use std::sync::Arc;

use mlplane_events::ModelEvent;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument};

use crate::sync::SyncEngine;

/// Consumes the coordinator's event listener and spawns one detached
/// reconciliation task per event.
pub struct SyncDispatcher {
    events: mpsc::Receiver<ModelEvent>,
    sync: Arc<SyncEngine>,
}

impl SyncDispatcher {
    pub(crate) fn new(events: mpsc::Receiver<ModelEvent>, sync: Arc<SyncEngine>) -> Self {
        Self { events, sync }
    }

    /// Runs until the event source closes or shutdown is signaled. Returns
    /// how many passes were started; in-flight passes are left to finish.
    #[instrument(skip_all)]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> usize {
        info!("Starting sync dispatcher");
        let mut dispatched = 0;

        loop {
            tokio::select! {
                event = self.events.recv() => {
                    let Some(event) = event else {
                        info!("Event source closed, sync dispatcher stopping");
                        break;
                    };
                    debug!(model = %event.model_name, source = %event.source, "Dispatching sync");
                    let sync = self.sync.clone();
                    tokio::spawn(async move {
                        sync.sync(&event.model_name).await;
                    });
                    dispatched += 1;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Sync dispatcher shutting down");
                        break;
                    }
                }
            }
        }

        dispatched
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use mlplane_id::{ConnectionId, ReplicaKey};
    use mlplane_state::{MemoryStore, ModelReplicaState, ModelStore};
    use mlplane_testing::fixtures::model_details;
    use tokio::sync::oneshot;

    use crate::registry::{AgentConnection, AgentRegistry};
    use crate::sink::ChannelSink;

    #[tokio::test]
    async fn test_event_triggers_sync() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(AgentRegistry::new());
        let engine = Arc::new(SyncEngine::new(store.clone(), registry.clone()));

        let replica = ReplicaKey::new("serverA", 0);
        let (sink, mut commands) = ChannelSink::channel(4, Duration::from_secs(1));
        let (close_tx, _close_rx) = oneshot::channel();
        registry.write().await.register(
            replica.clone(),
            AgentConnection::new(ConnectionId::new(), Box::new(sink), close_tx),
        );
        store.upsert_model(model_details("iris")).await;
        store.request_load("iris", 1, &replica).await.unwrap();

        let (tx, rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(SyncDispatcher::new(rx, engine).run(shutdown_rx));

        tx.send(ModelEvent::new("iris", "test")).await.unwrap();
        let command = tokio::time::timeout(Duration::from_secs(1), commands.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(command.model_name(), "iris");

        shutdown_tx.send(true).unwrap();
        assert_eq!(handle.await.unwrap(), 1);

        // The spawned pass records the send right after delivering it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let state = store
            .get_model("iris")
            .await
            .unwrap()
            .unwrap()
            .version(1)
            .unwrap()
            .replica_state(&replica);
        assert_eq!(state, ModelReplicaState::Loading);
    }

    #[tokio::test]
    async fn test_stops_when_source_closes() {
        let engine = Arc::new(SyncEngine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(AgentRegistry::new()),
        ));
        let (tx, rx) = mpsc::channel(1);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        drop(tx);

        assert_eq!(SyncDispatcher::new(rx, engine).run(shutdown_rx).await, 0);
    }
}
