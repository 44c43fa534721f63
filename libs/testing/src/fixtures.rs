//! Common test inputs.

use mlplane_proto::agent::v1::{AgentSubscribeRequest, ModelDetails, ReplicaConfig};

/// A small sklearn-style model.
pub fn model_details(name: &str) -> ModelDetails {
    ModelDetails {
        name: name.to_string(),
        uri: format!("gs://seldon-models/{name}"),
        memory_bytes: Some(64 * 1024 * 1024),
        requirements: vec!["sklearn".to_string()],
    }
}

/// Same model, different artifact, so the store records a new version.
pub fn model_details_rev(name: &str, rev: u32) -> ModelDetails {
    ModelDetails {
        uri: format!("gs://seldon-models/{name}-r{rev}"),
        ..model_details(name)
    }
}

pub fn subscribe_request(server: &str, replica_idx: u32) -> AgentSubscribeRequest {
    AgentSubscribeRequest {
        server_name: server.to_string(),
        replica_idx,
        replica_config: ReplicaConfig {
            inference_svc: format!("{server}-{replica_idx}"),
            inference_http_port: 9000,
            inference_grpc_port: 9500,
            memory_bytes: 1024 * 1024 * 1024,
            capabilities: vec!["sklearn".to_string(), "xgboost".to_string()],
            overcommit_percentage: 10,
        },
        loaded_models: vec![],
        shared: true,
    }
}
