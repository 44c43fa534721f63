//! Table of live replica connections.
//!
//! One lock guards the table. Reconciliation holds it shared for a whole
//! pass ([`AgentRegistry::read`]); connect and disconnect take it exclusively
//! ([`AgentRegistry::write`]), so a pass never sees a connection appear or
//! disappear halfway through. The map itself is never handed out.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use mlplane_id::{ConnectionId, ReplicaKey};
use mlplane_proto::agent::v1::ModelOperationMessage;
use serde::Serialize;
use tokio::sync::{oneshot, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use crate::sink::{CommandSink, SendError};

/// A registered replica stream: its send capability and its close signal.
pub struct AgentConnection {
    id: ConnectionId,
    sink: Box<dyn CommandSink>,
    close: Option<oneshot::Sender<()>>,
    connected_at: DateTime<Utc>,
}

impl AgentConnection {
    pub fn new(id: ConnectionId, sink: Box<dyn CommandSink>, close: oneshot::Sender<()>) -> Self {
        Self {
            id,
            sink,
            close: Some(close),
            connected_at: Utc::now(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub async fn send(&self, command: ModelOperationMessage) -> Result<(), SendError> {
        self.sink.send(command).await
    }

    /// Fires the close signal. Returns false if it already fired or the
    /// handler is gone.
    fn signal_close(&mut self) -> bool {
        self.close
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

/// What the registry exposes about a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentInfo {
    pub server_name: String,
    pub replica_idx: u32,
    pub connection_id: ConnectionId,
    pub connected_at: DateTime<Utc>,
    pub stream_closed: bool,
}

type AgentMap = HashMap<ReplicaKey, AgentConnection>;

#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<AgentMap>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared access for a reconciliation pass.
    pub async fn read(&self) -> RegistryView<'_> {
        RegistryView {
            agents: self.agents.read().await,
        }
    }

    /// Exclusive access for connect/disconnect.
    pub async fn write(&self) -> RegistryWriter<'_> {
        RegistryWriter {
            agents: self.agents.write().await,
        }
    }

    /// Removes the connection for `replica` and fires its close signal.
    pub async fn close(&self, replica: &ReplicaKey) -> bool {
        let removed = self.agents.write().await.remove(replica);
        match removed {
            Some(mut connection) => {
                info!(replica = %replica, connection_id = %connection.id, "Closing replica stream");
                connection.signal_close();
                true
            }
            None => false,
        }
    }

    /// Closes every connection; returns how many were open.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<(ReplicaKey, AgentConnection)> =
            self.agents.write().await.drain().collect();
        let count = drained.len();
        for (replica, mut connection) in drained {
            debug!(replica = %replica, connection_id = %connection.id, "Closing replica stream");
            connection.signal_close();
        }
        count
    }

    pub async fn snapshot(&self) -> Vec<AgentInfo> {
        let agents = self.agents.read().await;
        let mut infos: Vec<AgentInfo> = agents
            .iter()
            .map(|(key, connection)| AgentInfo {
                server_name: key.server_name.clone(),
                replica_idx: key.replica_idx,
                connection_id: connection.id,
                connected_at: connection.connected_at,
                stream_closed: connection.sink.is_closed(),
            })
            .collect();
        infos.sort_by(|a, b| {
            (&a.server_name, a.replica_idx).cmp(&(&b.server_name, b.replica_idx))
        });
        infos
    }

    pub async fn connection_id(&self, replica: &ReplicaKey) -> Option<ConnectionId> {
        self.agents.read().await.get(replica).map(|c| c.id)
    }

    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Shared view held for the duration of a reconciliation pass.
pub struct RegistryView<'a> {
    agents: RwLockReadGuard<'a, AgentMap>,
}

impl RegistryView<'_> {
    /// `None` means the replica is not connected right now.
    pub fn lookup(&self, replica: &ReplicaKey) -> Option<&AgentConnection> {
        self.agents.get(replica)
    }
}

/// Exclusive handle used while a replica connects or disconnects.
pub struct RegistryWriter<'a> {
    agents: RwLockWriteGuard<'a, AgentMap>,
}

impl RegistryWriter<'_> {
    /// Inserts or replaces the connection for `replica`.
    ///
    /// A replaced connection is sent its close signal and its id returned.
    pub fn register(
        &mut self,
        replica: ReplicaKey,
        connection: AgentConnection,
    ) -> Option<ConnectionId> {
        let new_id = connection.id;
        let mut displaced = self.agents.insert(replica.clone(), connection)?;
        info!(
            replica = %replica,
            connection_id = %new_id,
            displaced = %displaced.id,
            "Replica reconnected, closing previous stream"
        );
        displaced.signal_close();
        Some(displaced.id)
    }

    /// Removes the connection for `replica` if it is still `id`.
    ///
    /// A handler whose connection was already replaced never removes its
    /// successor.
    pub fn unregister(&mut self, replica: &ReplicaKey, id: ConnectionId) -> bool {
        match self.agents.get(replica) {
            Some(connection) if connection.id == id => {
                self.agents.remove(replica);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::sink::ChannelSink;

    fn connection() -> (AgentConnection, oneshot::Receiver<()>) {
        let (sink, _rx) = ChannelSink::channel(1, Duration::from_millis(10));
        let (close_tx, close_rx) = oneshot::channel();
        (
            AgentConnection::new(ConnectionId::new(), Box::new(sink), close_tx),
            close_rx,
        )
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = AgentRegistry::new();
        let key = ReplicaKey::new("mlserver", 0);
        let (conn, _close) = connection();
        let id = conn.id();

        assert!(registry.write().await.register(key.clone(), conn).is_none());

        let view = registry.read().await;
        assert_eq!(view.lookup(&key).map(|c| c.id()), Some(id));
        assert!(view.lookup(&ReplicaKey::new("mlserver", 1)).is_none());
    }

    #[tokio::test]
    async fn test_replacing_signals_previous_connection() {
        let registry = AgentRegistry::new();
        let key = ReplicaKey::new("mlserver", 0);
        let (first, first_close) = connection();
        let first_id = first.id();
        let (second, _second_close) = connection();
        let second_id = second.id();

        registry.write().await.register(key.clone(), first);
        let displaced = registry.write().await.register(key.clone(), second);

        assert_eq!(displaced, Some(first_id));
        assert!(first_close.await.is_ok());
        assert_eq!(registry.connection_id(&key).await, Some(second_id));
    }

    #[tokio::test]
    async fn test_stale_unregister_keeps_successor() {
        let registry = AgentRegistry::new();
        let key = ReplicaKey::new("mlserver", 0);
        let (first, _c1) = connection();
        let first_id = first.id();
        let (second, _c2) = connection();
        let second_id = second.id();

        registry.write().await.register(key.clone(), first);
        registry.write().await.register(key.clone(), second);

        assert!(!registry.write().await.unregister(&key, first_id));
        assert_eq!(registry.len().await, 1);
        assert!(registry.write().await.unregister(&key, second_id));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_close_removes_and_signals() {
        let registry = AgentRegistry::new();
        let key = ReplicaKey::new("mlserver", 0);
        let (conn, close) = connection();
        registry.write().await.register(key.clone(), conn);

        assert!(registry.close(&key).await);
        assert!(close.await.is_ok());
        assert!(!registry.close(&key).await);
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = AgentRegistry::new();
        let (a, a_close) = connection();
        let (b, b_close) = connection();
        {
            let mut writer = registry.write().await;
            writer.register(ReplicaKey::new("a", 0), a);
            writer.register(ReplicaKey::new("b", 0), b);
        }

        assert_eq!(registry.close_all().await, 2);
        assert!(a_close.await.is_ok());
        assert!(b_close.await.is_ok());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_snapshot_is_sorted() {
        let registry = AgentRegistry::new();
        let (a, _a) = connection();
        let (b, _b) = connection();
        {
            let mut writer = registry.write().await;
            writer.register(ReplicaKey::new("z", 0), a);
            writer.register(ReplicaKey::new("a", 3), b);
        }

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot[0].server_name, "a");
        assert_eq!(snapshot[1].server_name, "z");
        // The test sink's receiver was dropped on creation.
        assert!(snapshot[0].stream_closed);
    }
}
