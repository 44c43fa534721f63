//! The per-replica state machine of a model version.

use mlplane_proto::agent::v1::{ModelEventKind, ModelOperation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// State of one model version on one replica.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelReplicaState {
    #[default]
    Unknown,
    LoadRequested,
    Loading,
    Loaded,
    LoadFailed,
    UnloadRequested,
    Unloading,
    Unloaded,
}

impl ModelReplicaState {
    pub const ALL: [Self; 8] = [
        Self::Unknown,
        Self::LoadRequested,
        Self::Loading,
        Self::Loaded,
        Self::LoadFailed,
        Self::UnloadRequested,
        Self::Unloading,
        Self::Unloaded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::LoadRequested => "LoadRequested",
            Self::Loading => "Loading",
            Self::Loaded => "Loaded",
            Self::LoadFailed => "LoadFailed",
            Self::UnloadRequested => "UnloadRequested",
            Self::Unloading => "Unloading",
            Self::Unloaded => "Unloaded",
        }
    }

    /// Placement wants the version on this replica.
    ///
    /// A replica already loading or loaded keeps its state.
    #[must_use]
    pub fn request_load(self) -> Self {
        match self {
            Self::Loading | Self::Loaded => self,
            _ => Self::LoadRequested,
        }
    }

    /// Placement wants the version off this replica.
    ///
    /// A replica already unloading or unloaded keeps its state.
    #[must_use]
    pub fn request_unload(self) -> Self {
        match self {
            Self::Unloading | Self::Unloaded => self,
            _ => Self::UnloadRequested,
        }
    }

    /// The coordinator delivered `operation` to the replica.
    ///
    /// Only `LoadRequested + LOAD_MODEL` and `UnloadRequested + UNLOAD_MODEL`
    /// advance; anything else means the replica moved on since the command
    /// was chosen.
    pub fn on_command_sent(self, operation: ModelOperation) -> Result<Self, TransitionError> {
        match (self, operation) {
            (Self::LoadRequested, ModelOperation::LoadModel) => Ok(Self::Loading),
            (Self::UnloadRequested, ModelOperation::UnloadModel) => Ok(Self::Unloading),
            (from, operation) => Err(TransitionError::UnexpectedCommand { from, operation }),
        }
    }

    /// The replica reported its own state. Reports are authoritative.
    #[must_use]
    pub fn on_report(self, reported: ReportedState) -> Self {
        reported.into()
    }

    /// A command was sent and the replica has not reported back yet.
    pub fn awaiting_report(&self) -> bool {
        matches!(self, Self::Loading | Self::Unloading)
    }
}

impl std::fmt::Display for ModelReplicaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// States only a replica's own report can set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportedState {
    Loaded,
    Unloaded,
    LoadFailed,
    Unknown,
}

impl From<ModelEventKind> for ReportedState {
    fn from(kind: ModelEventKind) -> Self {
        match kind {
            ModelEventKind::Loaded => Self::Loaded,
            ModelEventKind::Unloaded => Self::Unloaded,
            ModelEventKind::LoadFailed | ModelEventKind::LoadFailMemory => Self::LoadFailed,
            _ => Self::Unknown,
        }
    }
}

impl From<ReportedState> for ModelReplicaState {
    fn from(reported: ReportedState) -> Self {
        match reported {
            ReportedState::Loaded => Self::Loaded,
            ReportedState::Unloaded => Self::Unloaded,
            ReportedState::LoadFailed => Self::LoadFailed,
            ReportedState::Unknown => Self::Unknown,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("cannot record {operation} as sent while replica is {from}")]
    UnexpectedCommand {
        from: ModelReplicaState,
        operation: ModelOperation,
    },
}
