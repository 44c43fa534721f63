use mlplane_id::ReplicaKey;
use thiserror::Error;

use crate::replica_state::TransitionError;

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by [`ModelStore`](crate::ModelStore) implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("model {model} has no version {version}")]
    VersionNotFound { model: String, version: u32 },

    #[error("model {model} version {version} has no entry for replica {replica}")]
    ReplicaNotFound {
        model: String,
        version: u32,
        replica: ReplicaKey,
    },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// The backing store could not be reached or refused the write.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Errors caused by the model or replica having changed underneath the
    /// caller, as opposed to the store itself failing.
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            Self::ModelNotFound(_)
                | Self::VersionNotFound { .. }
                | Self::ReplicaNotFound { .. }
                | Self::Transition(_)
        )
    }
}
