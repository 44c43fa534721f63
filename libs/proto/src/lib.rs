//! Wire messages exchanged between replica agents and the coordinator.
//!
//! Messages are JSON. On the subscribe stream every frame is one JSON
//! document: the replica's first frame is an
//! [`AgentSubscribeRequest`](agent::v1::AgentSubscribeRequest), every frame
//! after that is a coordinator-pushed
//! [`ModelOperationMessage`](agent::v1::ModelOperationMessage).

pub mod agent {
    pub mod v1;
}

mod error;

pub use error::ProtoError;

/// Encodes a message as a single JSON text frame.
pub fn encode<T: serde::Serialize>(message: &T) -> Result<String, ProtoError> {
    serde_json::to_string(message).map_err(ProtoError::from)
}

/// Decodes a message from a JSON text frame.
pub fn decode<T: serde::de::DeserializeOwned>(frame: &str) -> Result<T, ProtoError> {
    serde_json::from_str(frame).map_err(ProtoError::from)
}
