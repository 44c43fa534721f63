//! Cluster placement state for the mlplane control plane.
//!
//! This crate holds everything the coordinator treats as an external
//! collaborator:
//!
//! - the data model of models, versions and per-replica states
//! - the replica state machine ([`ModelReplicaState`])
//! - the [`ModelStore`] and [`Scheduler`] capabilities
//! - [`MemoryStore`], an in-process store implementation
//!
//! # Replica state transitions
//!
//! ```text
//!   desired path           command path            report path
//!   (placement)            (coordinator)           (replica)
//!
//!   * -> LoadRequested     LoadRequested -> Loading    * -> Loaded
//!   * -> UnloadRequested   UnloadRequested -> Unloading * -> Unloaded
//!                                                      * -> LoadFailed
//!                                                      * -> Unknown
//! ```
//!
//! Each path has its own function and input type, so the coordinator can
//! never mark a replica `Loaded` and a report can never mark it `Loading`.

mod error;
mod memory;
mod replica_state;
mod scheduler;
mod store;
mod types;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use replica_state::{ModelReplicaState, ReportedState, TransitionError};
pub use scheduler::{PassiveScheduler, Scheduler, SchedulerError};
pub use store::{ModelStore, StateChange, StateUpdate};
pub use types::{Model, ModelVersion, ReplicaStatus, ServerReplica};
