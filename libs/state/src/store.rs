//! The model store capability.

use async_trait::async_trait;
use mlplane_id::ReplicaKey;
use mlplane_proto::agent::v1::{AgentSubscribeRequest, ModelOperation};

use crate::{Model, ModelReplicaState, ReportedState, StoreResult, TransitionError};

/// How a replica's state changes in a [`StateUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    /// The coordinator delivered a command; see
    /// [`ModelReplicaState::on_command_sent`].
    CommandSent(ModelOperation),

    /// The replica reported its state; see [`ModelReplicaState::on_report`].
    Reported(ReportedState),
}

impl StateChange {
    /// Applies the change to `current`.
    pub fn apply(self, current: ModelReplicaState) -> Result<ModelReplicaState, TransitionError> {
        match self {
            Self::CommandSent(operation) => current.on_command_sent(operation),
            Self::Reported(reported) => Ok(current.on_report(reported)),
        }
    }
}

/// A single per-replica state write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateUpdate {
    pub model_name: String,
    pub version: u32,
    pub replica: ReplicaKey,
    pub change: StateChange,
    pub available_memory_bytes: Option<u64>,
    pub message: Option<String>,
}

impl StateUpdate {
    pub fn command_sent(
        model_name: impl Into<String>,
        version: u32,
        replica: ReplicaKey,
        operation: ModelOperation,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            version,
            replica,
            change: StateChange::CommandSent(operation),
            available_memory_bytes: None,
            message: None,
        }
    }

    pub fn reported(
        model_name: impl Into<String>,
        version: u32,
        replica: ReplicaKey,
        reported: ReportedState,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            version,
            replica,
            change: StateChange::Reported(reported),
            available_memory_bytes: None,
            message: None,
        }
    }

    pub fn with_available_memory(mut self, bytes: Option<u64>) -> Self {
        self.available_memory_bytes = bytes;
        self
    }

    pub fn with_message(mut self, message: Option<String>) -> Self {
        self.message = message.filter(|m| !m.is_empty());
        self
    }
}

/// Source of truth for models, versions and per-replica state.
///
/// Implementations must apply each [`StateUpdate`] atomically with respect
/// to concurrent readers: a reader sees the replica either before or after
/// the update, never in between.
#[async_trait]
pub trait ModelStore: Send + Sync {
    /// Returns the model, or `None` if the store does not know it.
    async fn get_model(&self, name: &str) -> StoreResult<Option<Model>>;

    /// Applies one per-replica state change.
    async fn update_model_state(&self, update: StateUpdate) -> StoreResult<()>;

    /// Records a subscribed replica, replacing any previous record.
    async fn add_server_replica(&self, request: &AgentSubscribeRequest) -> StoreResult<()>;

    /// Forgets a replica and its per-replica entries.
    ///
    /// Returns the names of the models whose placement changed, sorted and
    /// without duplicates.
    async fn remove_server_replica(&self, replica: &ReplicaKey) -> StoreResult<Vec<String>>;

    /// Names of models with any version assigned to `replica`.
    async fn models_on_replica(&self, replica: &ReplicaKey) -> StoreResult<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_message_is_dropped() {
        let update = StateUpdate::reported("iris", 1, ReplicaKey::new("s", 0), ReportedState::Loaded)
            .with_message(Some(String::new()));
        assert_eq!(update.message, None);
    }

    #[test]
    fn test_command_change_uses_command_path() {
        let change = StateChange::CommandSent(ModelOperation::LoadModel);
        assert_eq!(
            change.apply(ModelReplicaState::LoadRequested),
            Ok(ModelReplicaState::Loading)
        );
        assert!(change.apply(ModelReplicaState::Loaded).is_err());
    }
}
