//! # mlplane-events
//!
//! Notifications that a model's desired state may have changed.
//!
//! ## Delivery
//!
//! - Events only carry a model name; consumers re-read the store
//! - Delivery is at-least-once and consumers must treat replays as no-ops
//!   once the model has converged
//! - Publishing never blocks: each listener owns a bounded queue and an
//!   event is dropped for a listener whose queue is full

mod error;
mod hub;

pub use error::EventError;
pub use hub::{EventSource, ModelEventHub};

use serde::{Deserialize, Serialize};

/// "Re-evaluate placement for this model."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEvent {
    pub model_name: String,

    /// Component that published the event, for logs only.
    pub source: String,
}

impl ModelEvent {
    pub fn new(model_name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            source: source.into(),
        }
    }
}

impl std::fmt::Display for ModelEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (from {})", self.model_name, self.source)
    }
}
