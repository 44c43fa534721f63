//! Replica status reports.

use mlplane_proto::agent::v1::ModelEventMessage;
use mlplane_state::{ModelStore, ReportedState, StateUpdate};
use tracing::{debug, warn};

use crate::error::{CoordinatorError, CoordinatorResult};

/// Persists a replica's report about one model version.
///
/// Unknown event kinds are stored as `Unknown`. A store failure is returned
/// so the replica can retry the report.
pub async fn ingest(store: &dyn ModelStore, message: &ModelEventMessage) -> CoordinatorResult<()> {
    let replica = message.replica_key();
    let reported = ReportedState::from(message.event);
    debug!(
        model = %message.model_name,
        version = message.model_version,
        replica = %replica,
        event = ?message.event,
        ?reported,
        "Received model event"
    );

    let update = StateUpdate::reported(
        message.model_name.clone(),
        message.model_version,
        replica.clone(),
        reported,
    )
    .with_available_memory(message.available_memory_bytes)
    .with_message(message.message.clone());

    store.update_model_state(update).await.map_err(|source| {
        warn!(
            model = %message.model_name,
            version = message.model_version,
            replica = %replica,
            error = %source,
            "Failed to persist model event"
        );
        CoordinatorError::Persistence {
            model: message.model_name.clone(),
            source,
        }
    })
}
