//! The placement capability.

use std::sync::Arc;

use async_trait::async_trait;
use mlplane_events::{ModelEvent, ModelEventHub};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no replica can host model {model}: {reason}")]
    Unschedulable { model: String, reason: String },

    #[error("scheduler error: {0}")]
    Internal(String),
}

/// Decides which replicas host a model.
///
/// The coordinator only triggers placement; the decision itself is recorded
/// in the store as `LoadRequested`/`UnloadRequested` entries.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// (Re)computes placement for one model.
    async fn schedule(&self, model_name: &str) -> Result<(), SchedulerError>;

    /// Retries every model that currently has no valid placement and returns
    /// how many were retried.
    async fn schedule_failed_models(&self) -> Result<usize, SchedulerError>;
}

/// Scheduler without a placement policy.
///
/// `schedule` republishes a model event so the model is reconciled against
/// whatever placement was written to the store by other means;
/// `schedule_failed_models` has nothing to retry.
pub struct PassiveScheduler {
    events: Arc<ModelEventHub>,
}

impl PassiveScheduler {
    pub fn new(events: Arc<ModelEventHub>) -> Self {
        Self { events }
    }
}

#[async_trait]
impl Scheduler for PassiveScheduler {
    async fn schedule(&self, model_name: &str) -> Result<(), SchedulerError> {
        debug!(model = %model_name, "No placement policy, requesting reconciliation only");
        self.events
            .publish(ModelEvent::new(model_name, "passive-scheduler"))
            .map(|_| ())
            .map_err(|e| SchedulerError::Internal(e.to_string()))
    }

    async fn schedule_failed_models(&self) -> Result<usize, SchedulerError> {
        Ok(0)
    }
}
