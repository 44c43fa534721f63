//! In-process [`ModelStore`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use mlplane_events::{ModelEvent, ModelEventHub};
use mlplane_id::ReplicaKey;
use mlplane_proto::agent::v1::{AgentSubscribeRequest, ModelDetails};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{
    Model, ModelReplicaState, ModelStore, ModelVersion, ReplicaStatus, ServerReplica, StateUpdate,
    StoreError, StoreResult,
};

const EVENT_SOURCE: &str = "memory-store";

#[derive(Default)]
struct Inner {
    models: HashMap<String, Model>,
    replicas: BTreeMap<ReplicaKey, ServerReplica>,
}

/// Keeps all state behind a single lock.
///
/// Desired-state writes (`upsert_model`, `request_load`, `request_unload`)
/// publish a [`ModelEvent`] when the store was built with a hub.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    events: Option<Arc<ModelEventHub>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: Arc<ModelEventHub>) -> Self {
        Self {
            inner: RwLock::default(),
            events: Some(events),
        }
    }

    /// Stores `details` as the newest version of its model and returns the
    /// version number. Identical details keep the current latest version.
    pub async fn upsert_model(&self, details: ModelDetails) -> u32 {
        let name = details.name.clone();
        let version = {
            let mut inner = self.inner.write().await;
            let model = inner
                .models
                .entry(name.clone())
                .or_insert_with(|| Model::new(name.clone()));

            let latest = model
                .latest()
                .map(|v| (v.version, v.details == details));
            match latest {
                Some((version, true)) => version,
                latest => {
                    let next = latest.map_or(1, |(version, _)| version + 1);
                    model.versions.push(ModelVersion::new(details, next));
                    info!(model = %name, version = next, "Stored new model version");
                    next
                }
            }
        };

        self.notify(&name);
        version
    }

    /// Marks `version` of `model` as wanted on `replica`.
    pub async fn request_load(
        &self,
        model: &str,
        version: u32,
        replica: &ReplicaKey,
    ) -> StoreResult<ModelReplicaState> {
        let state = self
            .set_desired(model, version, replica, ModelReplicaState::request_load)
            .await?;
        self.notify(model);
        Ok(state)
    }

    /// Marks `version` of `model` as no longer wanted on `replica`.
    pub async fn request_unload(
        &self,
        model: &str,
        version: u32,
        replica: &ReplicaKey,
    ) -> StoreResult<ModelReplicaState> {
        let state = self
            .set_desired(model, version, replica, ModelReplicaState::request_unload)
            .await?;
        self.notify(model);
        Ok(state)
    }

    pub async fn server_replica(&self, replica: &ReplicaKey) -> Option<ServerReplica> {
        self.inner.read().await.replicas.get(replica).cloned()
    }

    async fn set_desired(
        &self,
        model: &str,
        version: u32,
        replica: &ReplicaKey,
        transition: fn(ModelReplicaState) -> ModelReplicaState,
    ) -> StoreResult<ModelReplicaState> {
        let mut inner = self.inner.write().await;
        let version_state = inner
            .models
            .get_mut(model)
            .ok_or_else(|| StoreError::ModelNotFound(model.to_string()))?
            .version_mut(version)
            .ok_or_else(|| StoreError::VersionNotFound {
                model: model.to_string(),
                version,
            })?;

        let status = version_state
            .replicas
            .entry(replica.clone())
            .or_insert_with(|| ReplicaStatus::new(ModelReplicaState::Unknown));
        let next = transition(status.state);
        if next != status.state {
            status.state = next;
            status.reason = None;
            status.updated_at = Utc::now();
        }

        debug!(model, version, replica = %replica, state = %next, "Desired state recorded");
        Ok(next)
    }

    fn notify(&self, model: &str) {
        if let Some(events) = &self.events {
            // A closed hub only happens during shutdown.
            let _ = events.publish(ModelEvent::new(model, EVENT_SOURCE));
        }
    }
}

#[async_trait]
impl ModelStore for MemoryStore {
    async fn get_model(&self, name: &str) -> StoreResult<Option<Model>> {
        Ok(self.inner.read().await.models.get(name).cloned())
    }

    async fn update_model_state(&self, update: StateUpdate) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let Inner { models, replicas } = &mut *inner;

        let version = models
            .get_mut(&update.model_name)
            .ok_or_else(|| StoreError::ModelNotFound(update.model_name.clone()))?
            .version_mut(update.version)
            .ok_or_else(|| StoreError::VersionNotFound {
                model: update.model_name.clone(),
                version: update.version,
            })?;

        let status = match update.change {
            crate::StateChange::CommandSent(_) => version
                .replicas
                .get_mut(&update.replica)
                .ok_or_else(|| StoreError::ReplicaNotFound {
                    model: update.model_name.clone(),
                    version: update.version,
                    replica: update.replica.clone(),
                })?,
            // A replica's report is authoritative even without a prior entry.
            crate::StateChange::Reported(_) => version
                .replicas
                .entry(update.replica.clone())
                .or_insert_with(|| ReplicaStatus::new(ModelReplicaState::Unknown)),
        };

        let next = update.change.apply(status.state)?;
        status.state = next;
        status.reason = update.message.clone();
        status.updated_at = Utc::now();

        if let Some(bytes) = update.available_memory_bytes {
            if let Some(server_replica) = replicas.get_mut(&update.replica) {
                server_replica.available_memory_bytes = bytes;
            }
        }

        debug!(
            model = %update.model_name,
            version = update.version,
            replica = %update.replica,
            state = %next,
            "Replica state updated"
        );
        Ok(())
    }

    async fn add_server_replica(&self, request: &AgentSubscribeRequest) -> StoreResult<()> {
        let replica = ServerReplica::from_subscribe(request);
        info!(
            replica = %replica.key,
            memory_bytes = replica.config.memory_bytes,
            loaded_models = replica.loaded_models.len(),
            "Server replica added"
        );
        self.inner
            .write()
            .await
            .replicas
            .insert(replica.key.clone(), replica);
        Ok(())
    }

    async fn remove_server_replica(&self, replica: &ReplicaKey) -> StoreResult<Vec<String>> {
        let mut inner = self.inner.write().await;
        inner.replicas.remove(replica);

        let mut affected = BTreeSet::new();
        for model in inner.models.values_mut() {
            for version in &mut model.versions {
                if version.replicas.remove(replica).is_some() {
                    affected.insert(model.name.clone());
                }
            }
        }

        info!(replica = %replica, affected = affected.len(), "Server replica removed");
        Ok(affected.into_iter().collect())
    }

    async fn models_on_replica(&self, replica: &ReplicaKey) -> StoreResult<Vec<String>> {
        let inner = self.inner.read().await;
        let mut names: Vec<String> = inner
            .models
            .values()
            .filter(|model| model.is_assigned_to(replica))
            .map(|model| model.name.clone())
            .collect();
        names.sort();
        Ok(names)
    }
}
