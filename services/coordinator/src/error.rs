//! Coordinator error types.

use mlplane_id::ReplicaKey;
use mlplane_state::StoreError;
use thiserror::Error;

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The store refused to record a subscribing replica; the subscribe is
    /// aborted.
    #[error("failed to register replica {replica}: {source}")]
    Registration {
        replica: ReplicaKey,
        #[source]
        source: StoreError,
    },

    /// A replica's status report could not be persisted. The replica should
    /// retry the report.
    #[error("failed to persist report for model {model}: {source}")]
    Persistence {
        model: String,
        #[source]
        source: StoreError,
    },
}
