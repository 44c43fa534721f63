//! In-process fan-out of model events.

use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{EventError, ModelEvent};

/// A subscribable channel of model events.
pub trait EventSource: Send + Sync {
    /// Registers a listener with a queue of `capacity` events.
    ///
    /// The receiver yields `None` once the source is closed.
    fn subscribe(&self, name: &str, capacity: usize) -> mpsc::Receiver<ModelEvent>;
}

struct Listener {
    name: String,
    tx: mpsc::Sender<ModelEvent>,
}

#[derive(Default)]
struct HubState {
    listeners: Vec<Listener>,
    closed: bool,
}

/// Fans each published event out to every registered listener.
#[derive(Default)]
pub struct ModelEventHub {
    state: Mutex<HubState>,
}

impl ModelEventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes an event to all listeners without waiting.
    ///
    /// Returns how many listeners accepted the event. Listeners whose
    /// receiver was dropped are removed.
    pub fn publish(&self, event: ModelEvent) -> Result<usize, EventError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.closed {
            return Err(EventError::Closed);
        }

        let mut delivered = 0;
        state.listeners.retain(|listener| match listener.tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    listener = %listener.name,
                    model = %event.model_name,
                    "Listener queue full, dropping model event"
                );
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(listener = %listener.name, "Removing closed listener");
                false
            }
        });

        Ok(delivered)
    }

    /// Closes the hub. Every listener's receiver drains and then ends.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.closed = true;
        state.listeners.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).closed
    }

    pub fn listener_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .listeners
            .len()
    }
}

impl EventSource for ModelEventHub {
    fn subscribe(&self, name: &str, capacity: usize) -> mpsc::Receiver<ModelEvent> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        // Registering on a closed hub hands back an already-finished receiver.
        if !state.closed {
            state.listeners.push(Listener {
                name: name.to_string(),
                tx,
            });
        }
        rx
    }
}
