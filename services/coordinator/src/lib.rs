//! mlplane coordinator.
//!
//! Keeps inference-server replicas in line with the model store: replicas
//! subscribe for a command stream, the coordinator pushes load and unload
//! commands as desired state changes, and replicas report back what they
//! actually did.
//!
//! The crate ships the `coordinator` binary; the library surface exists for
//! integration testing and reuse.

pub mod api;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod registry;
pub mod report;
pub mod server;
pub mod sink;
pub mod state;
pub mod sync;
