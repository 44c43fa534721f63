//! Error types for event publishing.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The hub was closed; no further events are delivered.
    #[error("event hub is closed")]
    Closed,
}
