//! Agent protocol, version 1.

use mlplane_id::ReplicaKey;
use serde::{Deserialize, Serialize};

/// Static configuration a replica announces when it subscribes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Host the inference server listens on.
    pub inference_svc: String,
    pub inference_http_port: u16,
    pub inference_grpc_port: u16,

    /// Memory available for models on this replica.
    pub memory_bytes: u64,

    /// Capabilities used to match model requirements (for example `sklearn`).
    #[serde(default)]
    pub capabilities: Vec<String>,

    #[serde(default)]
    pub overcommit_percentage: u32,
}

/// Immutable description of a deployable model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDetails {
    pub name: String,

    /// Artifact location, opaque to the coordinator.
    #[serde(default)]
    pub uri: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<u64>,

    #[serde(default)]
    pub requirements: Vec<String>,
}

/// A model together with the version a command or report refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub model: ModelDetails,
    pub version: u32,
}

/// First frame on the subscribe stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSubscribeRequest {
    pub server_name: String,
    pub replica_idx: u32,
    pub replica_config: ReplicaConfig,

    /// Models the replica already has in memory (after an agent restart).
    #[serde(default)]
    pub loaded_models: Vec<ModelVersion>,

    /// Whether the server is shared between namespaces.
    #[serde(default)]
    pub shared: bool,
}

impl AgentSubscribeRequest {
    pub fn replica_key(&self) -> ReplicaKey {
        ReplicaKey::new(self.server_name.clone(), self.replica_idx)
    }
}

/// Commands pushed to a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelOperation {
    LoadModel,
    UnloadModel,
}

impl ModelOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoadModel => "LOAD_MODEL",
            Self::UnloadModel => "UNLOAD_MODEL",
        }
    }
}

impl std::fmt::Display for ModelOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command frame on the subscribe stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOperationMessage {
    pub operation: ModelOperation,
    pub model_version: ModelVersion,
}

impl ModelOperationMessage {
    pub fn load(model: ModelDetails, version: u32) -> Self {
        Self {
            operation: ModelOperation::LoadModel,
            model_version: ModelVersion { model, version },
        }
    }

    pub fn unload(model: ModelDetails, version: u32) -> Self {
        Self {
            operation: ModelOperation::UnloadModel,
            model_version: ModelVersion { model, version },
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_version.model.name
    }

    pub fn version(&self) -> u32 {
        self.model_version.version
    }
}

/// Kinds of events a replica reports about a model it hosts.
///
/// Unrecognised kinds decode as [`ModelEventKind::Unknown`] so that newer
/// agents can report to older coordinators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelEventKind {
    Loaded,
    Unloaded,
    LoadFailed,
    LoadFailMemory,
    UnloadFailed,
    Removed,
    #[serde(other)]
    Unknown,
}

/// Status report sent by a replica (unary call).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEventMessage {
    pub server_name: String,
    pub replica_idx: u32,
    pub model_name: String,
    pub model_version: u32,
    pub event: ModelEventKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_memory_bytes: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ModelEventMessage {
    pub fn replica_key(&self) -> ReplicaKey {
        ReplicaKey::new(self.server_name.clone(), self.replica_idx)
    }
}

/// Acknowledgement of a [`ModelEventMessage`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEventResponse {}
