//! Replica identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one running inference-server process slot.
///
/// The key is created when a replica subscribes and is the lookup key of the
/// coordinator's connection table and of every per-replica state entry in the
/// store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReplicaKey {
    /// Name of the server (capacity pool) the replica belongs to.
    pub server_name: String,

    /// Index of the replica within its server.
    pub replica_idx: u32,
}

impl ReplicaKey {
    pub fn new(server_name: impl Into<String>, replica_idx: u32) -> Self {
        Self {
            server_name: server_name.into(),
            replica_idx,
        }
    }
}

impl fmt::Display for ReplicaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.server_name, self.replica_idx)
    }
}
