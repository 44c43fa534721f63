//! Test doubles for the coordinator's collaborators.
//!
//! - [`RecordingScheduler`] records placement triggers and can be told to fail
//! - [`FlakyStore`] wraps any [`ModelStore`] and injects write failures
//! - [`fixtures`] builds the requests and models most tests start from

pub mod fixtures;

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use mlplane_id::ReplicaKey;
use mlplane_proto::agent::v1::AgentSubscribeRequest;
use mlplane_state::{
    Model, ModelStore, Scheduler, SchedulerError, StateChange, StateUpdate, StoreError,
    StoreResult,
};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Scheduler that records every call.
#[derive(Default)]
pub struct RecordingScheduler {
    scheduled: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    failed_models_calls: Mutex<usize>,
    fail_failed_models: Mutex<bool>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `schedule(model)` return an error (the call is still recorded).
    pub fn fail_model(&self, model: &str) {
        lock(&self.failing).insert(model.to_string());
    }

    pub fn fail_schedule_failed_models(&self) {
        *lock(&self.fail_failed_models) = true;
    }

    /// Models passed to `schedule`, in call order.
    pub fn scheduled(&self) -> Vec<String> {
        lock(&self.scheduled).clone()
    }

    pub fn schedule_count(&self, model: &str) -> usize {
        lock(&self.scheduled).iter().filter(|m| *m == model).count()
    }

    pub fn failed_models_calls(&self) -> usize {
        *lock(&self.failed_models_calls)
    }
}

#[async_trait]
impl Scheduler for RecordingScheduler {
    async fn schedule(&self, model_name: &str) -> Result<(), SchedulerError> {
        lock(&self.scheduled).push(model_name.to_string());
        if lock(&self.failing).contains(model_name) {
            return Err(SchedulerError::Unschedulable {
                model: model_name.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    async fn schedule_failed_models(&self) -> Result<usize, SchedulerError> {
        *lock(&self.failed_models_calls) += 1;
        if *lock(&self.fail_failed_models) {
            return Err(SchedulerError::Internal("injected failure".to_string()));
        }
        Ok(0)
    }
}

/// Which writes a [`FlakyStore`] rejects.
#[derive(Default)]
struct Faults {
    command_writes: HashSet<(String, ReplicaKey)>,
    reports: bool,
    add_replica: bool,
    remove_replica: bool,
}

/// Wraps a store and fails selected writes with [`StoreError::Unavailable`].
pub struct FlakyStore<S> {
    inner: S,
    faults: Mutex<Faults>,
}

impl<S: ModelStore> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            faults: Mutex::new(Faults::default()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Fails command-sent writes for `model` on `replica`.
    pub fn fail_command_write(&self, model: &str, replica: ReplicaKey) {
        lock(&self.faults)
            .command_writes
            .insert((model.to_string(), replica));
    }

    /// Fails every report-driven write.
    pub fn fail_reports(&self) {
        lock(&self.faults).reports = true;
    }

    pub fn fail_add_replica(&self) {
        lock(&self.faults).add_replica = true;
    }

    pub fn fail_remove_replica(&self) {
        lock(&self.faults).remove_replica = true;
    }
}

fn unavailable(what: &str) -> StoreError {
    StoreError::Unavailable(format!("injected {what} failure"))
}

#[async_trait]
impl<S: ModelStore> ModelStore for FlakyStore<S> {
    async fn get_model(&self, name: &str) -> StoreResult<Option<Model>> {
        self.inner.get_model(name).await
    }

    async fn update_model_state(&self, update: StateUpdate) -> StoreResult<()> {
        let rejected = {
            let faults = lock(&self.faults);
            match update.change {
                StateChange::CommandSent(_) => faults
                    .command_writes
                    .contains(&(update.model_name.clone(), update.replica.clone())),
                StateChange::Reported(_) => faults.reports,
            }
        };
        if rejected {
            return Err(unavailable("state write"));
        }
        self.inner.update_model_state(update).await
    }

    async fn add_server_replica(&self, request: &AgentSubscribeRequest) -> StoreResult<()> {
        if lock(&self.faults).add_replica {
            return Err(unavailable("add replica"));
        }
        self.inner.add_server_replica(request).await
    }

    async fn remove_server_replica(&self, replica: &ReplicaKey) -> StoreResult<Vec<String>> {
        if lock(&self.faults).remove_replica {
            return Err(unavailable("remove replica"));
        }
        self.inner.remove_server_replica(replica).await
    }

    async fn models_on_replica(&self, replica: &ReplicaKey) -> StoreResult<Vec<String>> {
        self.inner.models_on_replica(replica).await
    }
}
