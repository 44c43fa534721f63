//! Reconciliation: push a model's pending commands to its replicas.
//!
//! A pass for one model:
//!
//! 1. Reads the model; a missing model ends the pass (stale event).
//! 2. Sends `LOAD_MODEL` to every connected replica in `LoadRequested` on the
//!    **latest** version only.
//! 3. Sends `UNLOAD_MODEL` to every connected replica in `UnloadRequested`
//!    on **any** version.
//!
//! A replica only moves to `Loading`/`Unloading` after its send succeeded.
//! Disconnected replicas, failed sends and failed state writes are counted
//! and skipped; nothing is retried until the next pass.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use mlplane_id::ReplicaKey;
use mlplane_proto::agent::v1::{ModelOperation, ModelOperationMessage};
use mlplane_state::{ModelReplicaState, ModelStore, ModelVersion, StateUpdate};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::registry::{AgentRegistry, RegistryView};

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub model: String,
    pub model_found: bool,
    pub loads_sent: usize,
    pub unloads_sent: usize,
    pub not_connected: usize,
    pub send_failures: usize,
    pub state_update_failures: usize,
}

impl SyncReport {
    fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..Default::default()
        }
    }

    pub fn commands_sent(&self) -> usize {
        self.loads_sent + self.unloads_sent
    }
}

type ModelLock = Arc<tokio::sync::Mutex<()>>;

pub struct SyncEngine {
    store: Arc<dyn ModelStore>,
    registry: Arc<AgentRegistry>,
    // Passes for the same model run one at a time; different models run
    // concurrently.
    model_locks: Mutex<HashMap<String, ModelLock>>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn ModelStore>, registry: Arc<AgentRegistry>) -> Self {
        Self {
            store,
            registry,
            model_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Runs one reconciliation pass for `model_name`.
    #[instrument(skip_all, fields(model = %model_name))]
    pub async fn sync(&self, model_name: &str) -> SyncReport {
        let model_lock = self.model_lock(model_name);
        let report = {
            let _serialized = model_lock.lock().await;
            self.sync_locked(model_name).await
        };
        drop(model_lock);
        self.release_model_lock(model_name);

        if report.commands_sent() > 0 || report.send_failures > 0 {
            info!(
                loads_sent = report.loads_sent,
                unloads_sent = report.unloads_sent,
                not_connected = report.not_connected,
                send_failures = report.send_failures,
                state_update_failures = report.state_update_failures,
                "Sync complete"
            );
        }
        report
    }

    async fn sync_locked(&self, model_name: &str) -> SyncReport {
        let mut report = SyncReport::new(model_name);
        let agents = self.registry.read().await;

        let model = match self.store.get_model(model_name).await {
            Ok(Some(model)) => model,
            Ok(None) => {
                warn!("Model not found, nothing to sync");
                return report;
            }
            Err(e) => {
                error!(error = %e, "Sync failed to read model");
                return report;
            }
        };
        report.model_found = true;

        // New loads only ever target the latest version.
        if let Some(latest) = model.latest() {
            for replica in latest.replicas_in_state(ModelReplicaState::LoadRequested) {
                self.dispatch(&agents, latest, &replica, ModelOperation::LoadModel, &mut report)
                    .await;
            }
        }

        // Any version may still be draining from a replica.
        for version in &model.versions {
            for replica in version.replicas_in_state(ModelReplicaState::UnloadRequested) {
                self.dispatch(&agents, version, &replica, ModelOperation::UnloadModel, &mut report)
                    .await;
            }
        }

        report
    }

    async fn dispatch(
        &self,
        agents: &RegistryView<'_>,
        version: &ModelVersion,
        replica: &ReplicaKey,
        operation: ModelOperation,
        report: &mut SyncReport,
    ) {
        let Some(connection) = agents.lookup(replica) else {
            warn!(
                replica = %replica,
                version = version.version,
                %operation,
                "Replica not connected, leaving command pending"
            );
            report.not_connected += 1;
            return;
        };

        let command = match operation {
            ModelOperation::LoadModel => {
                ModelOperationMessage::load(version.details.clone(), version.version)
            }
            ModelOperation::UnloadModel => {
                ModelOperationMessage::unload(version.details.clone(), version.version)
            }
        };

        debug!(replica = %replica, version = version.version, %operation, "Sending command");
        if let Err(e) = connection.send(command).await {
            warn!(
                replica = %replica,
                connection_id = %connection.id(),
                version = version.version,
                %operation,
                error = %e,
                "Command send failed"
            );
            report.send_failures += 1;
            return;
        }

        let update =
            StateUpdate::command_sent(version.name(), version.version, replica.clone(), operation);
        if let Err(e) = self.store.update_model_state(update).await {
            if e.is_stale() {
                warn!(replica = %replica, version = version.version, error = %e, "Replica changed during sync");
            } else {
                error!(replica = %replica, version = version.version, error = %e, "Failed to record sent command");
            }
            report.state_update_failures += 1;
            return;
        }

        match operation {
            ModelOperation::LoadModel => report.loads_sent += 1,
            ModelOperation::UnloadModel => report.unloads_sent += 1,
        }
    }

    fn model_lock(&self, model_name: &str) -> ModelLock {
        let mut locks = self.model_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(model_name.to_string()).or_default().clone()
    }

    fn release_model_lock(&self, model_name: &str) {
        let mut locks = self.model_locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(model_name)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(model_name);
        }
    }
}
