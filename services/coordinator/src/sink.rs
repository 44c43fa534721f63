//! Outbound command capability of a connected replica.

use std::time::Duration;

use async_trait::async_trait;
use mlplane_proto::agent::v1::ModelOperationMessage;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("command stream is closed")]
    Closed,

    #[error("command send timed out after {0:?}")]
    Timeout(Duration),
}

/// "Can send a command to replica X."
///
/// Reconciliation depends only on this trait, never on the transport.
#[async_trait]
pub trait CommandSink: Send + Sync {
    /// Hands one command to the replica's stream. Commands sent through the
    /// same sink are delivered in order.
    async fn send(&self, command: ModelOperationMessage) -> Result<(), SendError>;

    fn is_closed(&self) -> bool;
}

/// Sink backed by a bounded queue drained by the connection's writer task.
pub struct ChannelSink {
    tx: mpsc::Sender<ModelOperationMessage>,
    timeout: Duration,
}

impl ChannelSink {
    /// Creates a sink and the receiver its writer task drains.
    pub fn channel(
        capacity: usize,
        timeout: Duration,
    ) -> (Self, mpsc::Receiver<ModelOperationMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, timeout }, rx)
    }
}

#[async_trait]
impl CommandSink for ChannelSink {
    async fn send(&self, command: ModelOperationMessage) -> Result<(), SendError> {
        match tokio::time::timeout(self.timeout, self.tx.send(command)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SendError::Closed),
            Err(_) => Err(SendError::Timeout(self.timeout)),
        }
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
