//! # mlplane-id
//!
//! Identity types shared by the coordinator, the store and the agent client.
//!
//! ## Replica identity
//!
//! A replica is one inference-server process slot, identified by the pair
//! (server name, replica index). [`ReplicaKey`] is that pair; its display
//! form is `{server}:{index}` (for example `triton:0`).
//!
//! ## Generated ids
//!
//! Connections and requests get prefixed ULID ids, `{prefix}_{ulid}`:
//!
//! - `conn_01HV4Z2WQXKJNM8GPQY6VBKC3D`
//! - `req_01HV4Z3MXNKPQR9HSTZ7WCLD4E`
//!
//! A fresh [`ConnectionId`] is minted for every accepted subscribe, so a
//! reconnecting replica never shares an id with its previous stream.

mod error;
mod macros;
mod replica;
mod types;

pub use error::IdError;
pub use replica::ReplicaKey;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
