//! Models, versions and server replicas as held by the store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use mlplane_id::ReplicaKey;
use mlplane_proto::agent::v1::{self as wire, ModelDetails, ReplicaConfig};
use serde::Serialize;

use crate::ModelReplicaState;

/// State of a model version on one replica, plus the last reason given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicaStatus {
    pub state: ModelReplicaState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ReplicaStatus {
    pub fn new(state: ModelReplicaState) -> Self {
        Self {
            state,
            reason: None,
            updated_at: Utc::now(),
        }
    }
}

/// One version of a model: an immutable descriptor plus the mutable
/// per-replica state table.
#[derive(Debug, Clone)]
pub struct ModelVersion {
    pub details: ModelDetails,
    pub version: u32,
    pub replicas: BTreeMap<ReplicaKey, ReplicaStatus>,
}

impl ModelVersion {
    pub fn new(details: ModelDetails, version: u32) -> Self {
        Self {
            details,
            version,
            replicas: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.details.name
    }

    /// Current state on `replica`; a replica without an entry is `Unknown`.
    pub fn replica_state(&self, replica: &ReplicaKey) -> ModelReplicaState {
        self.replicas
            .get(replica)
            .map(|status| status.state)
            .unwrap_or_default()
    }

    /// Replicas currently in `state`, in key order.
    pub fn replicas_in_state(&self, state: ModelReplicaState) -> Vec<ReplicaKey> {
        self.replicas
            .iter()
            .filter(|(_, status)| status.state == state)
            .map(|(key, _)| key.clone())
            .collect()
    }
}

/// A model and every version the store still tracks, oldest first.
#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    pub versions: Vec<ModelVersion>,
}

impl Model {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            versions: Vec::new(),
        }
    }

    /// The highest version, the only one eligible for new loads.
    pub fn latest(&self) -> Option<&ModelVersion> {
        self.versions.iter().max_by_key(|v| v.version)
    }

    pub fn version(&self, version: u32) -> Option<&ModelVersion> {
        self.versions.iter().find(|v| v.version == version)
    }

    pub fn version_mut(&mut self, version: u32) -> Option<&mut ModelVersion> {
        self.versions.iter_mut().find(|v| v.version == version)
    }

    /// Whether any version has an entry for `replica`.
    pub fn is_assigned_to(&self, replica: &ReplicaKey) -> bool {
        self.versions
            .iter()
            .any(|v| v.replicas.contains_key(replica))
    }
}

/// A subscribed replica as recorded by the store.
#[derive(Debug, Clone, Serialize)]
pub struct ServerReplica {
    pub key: ReplicaKey,
    pub config: ReplicaConfig,
    pub loaded_models: Vec<wire::ModelVersion>,
    pub shared: bool,
    /// Last figure reported by the replica, initially its configured memory.
    pub available_memory_bytes: u64,
    pub registered_at: DateTime<Utc>,
}

impl ServerReplica {
    pub fn from_subscribe(request: &wire::AgentSubscribeRequest) -> Self {
        Self {
            key: request.replica_key(),
            config: request.replica_config.clone(),
            loaded_models: request.loaded_models.clone(),
            shared: request.shared,
            available_memory_bytes: request.replica_config.memory_bytes,
            registered_at: Utc::now(),
        }
    }
}
