//! Lifecycle of one replica subscription.
//!
//! ```text
//! Connecting --register--> Active --close signal----> Closed (Explicit)
//!                                 \--peer went away--> Closed (PeerDisconnected)
//! ```
//!
//! Registration, the `Connecting -> Active` step and the store's replica
//! record all change under the registry's write lock, so a reconnect and
//! the previous stream's cleanup never interleave. An explicit close leaves
//! everything to whoever sent it. A peer disconnect unregisters the
//! connection (only if the registry still points at it), removes the
//! replica from the store and asks the scheduler to re-place every model it
//! hosted.

use std::future::Future;

use mlplane_id::{ConnectionId, ReplicaKey};
use mlplane_proto::agent::v1::AgentSubscribeRequest;
use tokio::sync::oneshot;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::registry::AgentConnection;
use crate::server::AgentServer;
use crate::sink::CommandSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Active,
    Closed,
}

/// Why a handler stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The connection was closed administratively or replaced by a newer
    /// stream for the same replica.
    Explicit,

    /// The replica went away.
    PeerDisconnected {
        /// Whether the registry entry still belonged to this connection.
        unregistered: bool,
        /// Models handed to the scheduler for re-placement.
        rescheduled: usize,
    },
}

pub struct ConnectionHandler {
    server: AgentServer,
    replica: ReplicaKey,
    connection_id: ConnectionId,
    state: ConnectionState,
    close_rx: oneshot::Receiver<()>,
}

impl ConnectionHandler {
    /// Registers the replica and runs its catch-up sync.
    #[instrument(
        skip_all,
        fields(server = %request.server_name, replica_idx = request.replica_idx)
    )]
    pub(crate) async fn connect(
        server: AgentServer,
        request: &AgentSubscribeRequest,
        sink: Box<dyn CommandSink>,
    ) -> CoordinatorResult<Self> {
        let replica = request.replica_key();
        let connection_id = ConnectionId::new();
        let (close_tx, close_rx) = oneshot::channel();

        let mut handler = Self {
            server,
            replica,
            connection_id,
            state: ConnectionState::Connecting,
            close_rx,
        };
        info!(connection_id = %connection_id, "Replica subscribing");

        {
            // The writer stays held across the store call so a racing
            // disconnect cleanup for the same key cannot interleave with it.
            let mut agents = handler.server.registry().write().await;
            agents.register(
                handler.replica.clone(),
                AgentConnection::new(connection_id, sink, close_tx),
            );
            handler.state = ConnectionState::Active;

            if let Err(source) = handler.server.store().add_server_replica(request).await {
                error!(connection_id = %connection_id, error = %source, "Failed to add server replica");
                agents.unregister(&handler.replica, connection_id);
                handler.state = ConnectionState::Closed;
                return Err(CoordinatorError::Registration {
                    replica: handler.replica.clone(),
                    source,
                });
            }
        }

        handler.catch_up().await;
        Ok(handler)
    }

    pub fn replica(&self) -> &ReplicaKey {
        &self.replica
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Replays reconciliation for every model already on this replica, then
    /// retries placement of unplaceable models.
    async fn catch_up(&self) {
        match self.server.store().models_on_replica(&self.replica).await {
            Ok(models) => {
                debug!(replica = %self.replica, models = models.len(), "Running catch-up sync");
                for model in models {
                    self.server.sync_engine().sync(&model).await;
                }
            }
            Err(e) => {
                warn!(replica = %self.replica, error = %e, "Failed to list models for catch-up sync");
            }
        }

        match self.server.scheduler().schedule_failed_models().await {
            Ok(count) if count > 0 => {
                info!(count, "Rescheduled previously failed models");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Failed to reschedule failed models");
            }
        }
    }

    /// Blocks until the connection is closed explicitly or `disconnected`
    /// resolves.
    #[instrument(
        skip_all,
        fields(server = %self.replica.server_name, replica_idx = self.replica.replica_idx, connection_id = %self.connection_id)
    )]
    pub async fn run<F>(mut self, disconnected: F) -> CloseReason
    where
        F: Future<Output = ()>,
    {
        let reason = tokio::select! {
            biased;
            _ = &mut self.close_rx => {
                info!("Closing stream on request");
                CloseReason::Explicit
            }
            _ = disconnected => {
                info!("Replica disconnected");
                self.on_peer_disconnect().await
            }
        };
        self.state = ConnectionState::Closed;
        reason
    }

    async fn on_peer_disconnect(&self) -> CloseReason {
        let affected = {
            // Registry and store change together; a reconnect for this key
            // waits on the writer until the old replica row is gone.
            let mut agents = self.server.registry().write().await;
            if !agents.unregister(&self.replica, self.connection_id) {
                // A newer stream owns the replica now; its state is not ours
                // to tear down.
                debug!("Stream already replaced, skipping disconnect cascade");
                return CloseReason::PeerDisconnected {
                    unregistered: false,
                    rescheduled: 0,
                };
            }

            match self.server.store().remove_server_replica(&self.replica).await {
                Ok(models) => models,
                Err(e) => {
                    error!(error = %e, "Failed to remove server replica");
                    Vec::new()
                }
            }
        };
        debug!(models = ?affected, "Models affected by disconnect");

        for model in &affected {
            if let Err(e) = self.server.scheduler().schedule(model).await {
                warn!(model = %model, error = %e, "Failed to reschedule model after disconnect");
            }
        }

        CloseReason::PeerDisconnected {
            unregistered: true,
            rescheduled: affected.len(),
        }
    }
}
