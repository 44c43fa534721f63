//! End-to-end tests: real axum server on an ephemeral port, replicas played
//! by `mlplane-agent-client`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use mlplane_agent_client::{AgentClient, ClientError, CommandStream};
use mlplane_coordinator::{
    api,
    server::{AgentServer, AgentServerOptions},
    state::AppState,
};
use mlplane_events::ModelEventHub;
use mlplane_id::ReplicaKey;
use mlplane_proto::agent::v1::{ModelEventKind, ModelEventMessage, ModelOperation};
use mlplane_state::{MemoryStore, ModelReplicaState, ModelStore};
use mlplane_testing::fixtures::{model_details, model_details_rev, subscribe_request};
use mlplane_testing::{FlakyStore, RecordingScheduler};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::{protocol::frame::coding::CloseCode, Message};

const WAIT: Duration = Duration::from_secs(5);

struct Fixture {
    base_url: String,
    store: Arc<FlakyStore<MemoryStore>>,
    scheduler: Arc<RecordingScheduler>,
    server: AgentServer,
    client: AgentClient,
    _shutdown: watch::Sender<bool>,
}

impl Fixture {
    async fn start() -> Self {
        let events = Arc::new(ModelEventHub::new());
        let store = Arc::new(FlakyStore::new(MemoryStore::with_events(events.clone())));
        let scheduler = Arc::new(RecordingScheduler::new());
        let server = AgentServer::new(
            store.clone(),
            scheduler.clone(),
            AgentServerOptions {
                send_timeout: Duration::from_millis(500),
                ..Default::default()
            },
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let dispatcher = server.dispatcher(events.as_ref());
        tokio::spawn(dispatcher.run(shutdown_rx));

        let app = api::create_router(AppState::new(server.clone(), events));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let base_url = format!("http://{addr}");
        Self {
            client: AgentClient::new(base_url.clone()),
            base_url,
            store,
            scheduler,
            server,
            _shutdown: shutdown_tx,
        }
    }

    fn memory(&self) -> &MemoryStore {
        self.store.inner()
    }

    /// Subscribes as `server:idx` and waits until the coordinator has
    /// registered the stream.
    async fn connect(&self, server: &str, idx: u32) -> CommandStream {
        let replica = ReplicaKey::new(server, idx);
        let previous = self.server.registry().connection_id(&replica).await;
        let stream = self
            .client
            .subscribe(&subscribe_request(server, idx))
            .await
            .unwrap();

        let deadline = Instant::now() + WAIT;
        loop {
            let current = self.server.registry().connection_id(&replica).await;
            if current.is_some() && current != previous {
                return stream;
            }
            assert!(Instant::now() < deadline, "replica {replica} never registered");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn state(&self, model: &str, version: u32, replica: &ReplicaKey) -> ModelReplicaState {
        self.store
            .get_model(model)
            .await
            .unwrap()
            .and_then(|m| m.version(version).map(|v| v.replica_state(replica)))
            .unwrap_or_default()
    }

    async fn wait_for_state(
        &self,
        model: &str,
        version: u32,
        replica: &ReplicaKey,
        expected: ModelReplicaState,
    ) {
        let deadline = Instant::now() + WAIT;
        loop {
            let state = self.state(model, version, replica).await;
            if state == expected {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "{model} v{version} on {replica} stuck in {state}, expected {expected}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn wait_until_disconnected(&self, replica: &ReplicaKey) {
        let deadline = Instant::now() + WAIT;
        while self.server.registry().connection_id(replica).await.is_some() {
            assert!(Instant::now() < deadline, "replica {replica} never unregistered");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

fn report(replica: &ReplicaKey, model: &str, version: u32, event: ModelEventKind) -> ModelEventMessage {
    ModelEventMessage {
        server_name: replica.server_name.clone(),
        replica_idx: replica.replica_idx,
        model_name: model.to_string(),
        model_version: version,
        event,
        available_memory_bytes: Some(256 * 1024 * 1024),
        message: None,
    }
}

async fn next_command(
    stream: &mut CommandStream,
) -> Option<mlplane_proto::agent::v1::ModelOperationMessage> {
    tokio::time::timeout(WAIT, stream.next_command())
        .await
        .expect("no command within timeout")
        .unwrap()
}

#[tokio::test]
async fn test_load_then_report_loaded() {
    let fx = Fixture::start().await;
    let replica = ReplicaKey::new("serverA", 0);
    let mut stream = fx.connect("serverA", 0).await;

    fx.memory().upsert_model(model_details("iris")).await;
    fx.memory().request_load("iris", 1, &replica).await.unwrap();

    let command = next_command(&mut stream).await.unwrap();
    assert_eq!(command.operation, ModelOperation::LoadModel);
    assert_eq!(command.model_name(), "iris");
    assert_eq!(command.version(), 1);
    fx.wait_for_state("iris", 1, &replica, ModelReplicaState::Loading)
        .await;

    fx.client
        .report(&report(&replica, "iris", 1, ModelEventKind::Loaded))
        .await
        .unwrap();
    assert_eq!(
        fx.state("iris", 1, &replica).await,
        ModelReplicaState::Loaded
    );

    // Re-delivery is harmless.
    fx.client
        .report(&report(&replica, "iris", 1, ModelEventKind::Loaded))
        .await
        .unwrap();
    assert_eq!(
        fx.state("iris", 1, &replica).await,
        ModelReplicaState::Loaded
    );
    assert_eq!(
        fx.memory()
            .server_replica(&replica)
            .await
            .unwrap()
            .available_memory_bytes,
        256 * 1024 * 1024
    );
}

#[tokio::test]
async fn test_disconnect_reschedules_hosted_model_once() {
    let fx = Fixture::start().await;
    let replica = ReplicaKey::new("serverA", 0);
    let mut stream = fx.connect("serverA", 0).await;

    fx.memory().upsert_model(model_details("iris")).await;
    fx.memory().request_load("iris", 1, &replica).await.unwrap();
    next_command(&mut stream).await.unwrap();
    fx.wait_for_state("iris", 1, &replica, ModelReplicaState::Loading)
        .await;
    fx.client
        .report(&report(&replica, "iris", 1, ModelEventKind::Loaded))
        .await
        .unwrap();

    stream.close().await.unwrap();
    fx.wait_until_disconnected(&replica).await;

    let deadline = Instant::now() + WAIT;
    while fx.scheduler.schedule_count("iris") == 0 {
        assert!(Instant::now() < deadline, "iris was never rescheduled");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(fx.scheduler.scheduled(), vec!["iris".to_string()]);
    assert!(fx.memory().server_replica(&replica).await.is_none());
    assert_eq!(
        fx.state("iris", 1, &replica).await,
        ModelReplicaState::Unknown
    );
}

#[tokio::test]
async fn test_pending_load_without_connection_sends_nothing() {
    let fx = Fixture::start().await;
    let replica = ReplicaKey::new("serverA", 0);
    fx.memory().upsert_model(model_details("iris")).await;
    fx.memory().request_load("iris", 1, &replica).await.unwrap();

    let response = reqwest::Client::new()
        .post(format!("{}/v1/models/iris/sync", fx.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["not_connected"], 1);
    assert_eq!(body["loads_sent"], 0);

    assert_eq!(
        fx.state("iris", 1, &replica).await,
        ModelReplicaState::LoadRequested
    );
}

#[tokio::test]
async fn test_reconnect_catches_up_pending_load() {
    let fx = Fixture::start().await;
    let replica = ReplicaKey::new("serverA", 0);
    fx.memory().upsert_model(model_details("iris")).await;
    fx.memory().request_load("iris", 1, &replica).await.unwrap();

    let mut stream = fx.connect("serverA", 0).await;

    let command = next_command(&mut stream).await.unwrap();
    assert_eq!(command.operation, ModelOperation::LoadModel);
    fx.wait_for_state("iris", 1, &replica, ModelReplicaState::Loading)
        .await;
    assert_eq!(fx.scheduler.failed_models_calls(), 1);
}

#[tokio::test]
async fn test_old_version_unloads_while_new_version_loads() {
    let fx = Fixture::start().await;
    let old = ReplicaKey::new("serverA", 0);
    let new = ReplicaKey::new("serverA", 1);
    let mut old_stream = fx.connect("serverA", 0).await;
    let mut new_stream = fx.connect("serverA", 1).await;

    fx.memory().upsert_model(model_details("iris")).await;
    fx.memory().upsert_model(model_details_rev("iris", 2)).await;
    fx.memory().request_unload("iris", 1, &old).await.unwrap();
    fx.memory().request_load("iris", 2, &new).await.unwrap();

    let unload = next_command(&mut old_stream).await.unwrap();
    assert_eq!(unload.operation, ModelOperation::UnloadModel);
    assert_eq!(unload.version(), 1);

    let load = next_command(&mut new_stream).await.unwrap();
    assert_eq!(load.operation, ModelOperation::LoadModel);
    assert_eq!(load.version(), 2);

    fx.wait_for_state("iris", 1, &old, ModelReplicaState::Unloading)
        .await;
    fx.wait_for_state("iris", 2, &new, ModelReplicaState::Loading)
        .await;
}

#[tokio::test]
async fn test_report_persistence_failure_is_internal_error() {
    let fx = Fixture::start().await;
    let replica = ReplicaKey::new("serverA", 0);
    fx.memory().upsert_model(model_details("iris")).await;
    fx.store.fail_reports();

    let err = fx
        .client
        .report(&report(&replica, "iris", 1, ModelEventKind::Loaded))
        .await
        .unwrap_err();

    match err {
        ClientError::Rejected { status, body } => {
            assert_eq!(status, 500);
            let problem: serde_json::Value = serde_json::from_str(&body).unwrap();
            assert_eq!(problem["code"], "internal");
            assert_eq!(problem["retryable"], true);
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_operator_close_ends_stream_without_cascade() {
    let fx = Fixture::start().await;
    let replica = ReplicaKey::new("serverA", 0);
    let mut stream = fx.connect("serverA", 0).await;

    let http = reqwest::Client::new();
    let response = http
        .delete(format!("{}/v1/agents/serverA/0", fx.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
    assert!(next_command(&mut stream).await.is_none());

    let response = http
        .delete(format!("{}/v1/agents/serverA/0", fx.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(fx.scheduler.scheduled().is_empty());
    assert!(fx.memory().server_replica(&replica).await.is_some());
}

#[tokio::test]
async fn test_reconnect_replaces_previous_stream() {
    let fx = Fixture::start().await;
    let replica = ReplicaKey::new("serverA", 0);
    let mut first = fx.connect("serverA", 0).await;
    let first_id = fx.server.registry().connection_id(&replica).await;

    let mut second = fx.connect("serverA", 0).await;
    let second_id = fx.server.registry().connection_id(&replica).await;
    assert_ne!(first_id, second_id);

    // The displaced stream is closed and does not tear down its successor.
    assert!(next_command(&mut first).await.is_none());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fx.server.registry().connection_id(&replica).await, second_id);
    assert!(fx.scheduler.scheduled().is_empty());

    fx.memory().upsert_model(model_details("iris")).await;
    fx.memory().request_load("iris", 1, &replica).await.unwrap();
    let command = next_command(&mut second).await.unwrap();
    assert_eq!(command.model_name(), "iris");
}

#[tokio::test]
async fn test_agents_listing_and_model_view() {
    let fx = Fixture::start().await;
    let replica = ReplicaKey::new("serverA", 0);
    let _stream = fx.connect("serverA", 0).await;
    fx.memory().upsert_model(model_details("iris")).await;
    fx.memory().request_load("iris", 1, &ReplicaKey::new("serverB", 0)).await.unwrap();

    let http = reqwest::Client::new();
    let agents: serde_json::Value = http
        .get(format!("{}/v1/agents", fx.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(agents["items"][0]["server_name"], replica.server_name);
    assert_eq!(agents["items"][0]["replica_idx"], 0);

    let model: serde_json::Value = http
        .get(format!("{}/v1/models/iris", fx.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(model["latest_version"], 1);
    assert_eq!(model["versions"][0]["replicas"][0]["server_name"], "serverB");
    assert_eq!(model["versions"][0]["replicas"][0]["state"], "LoadRequested");

    let missing = http
        .get(format!("{}/v1/models/ghost", fx.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
    assert_eq!(
        missing.headers()["content-type"],
        "application/problem+json"
    );
}

#[tokio::test]
async fn test_malformed_subscribe_is_closed_with_policy_code() {
    let fx = Fixture::start().await;
    let url = format!(
        "{}/v1/agent/subscribe",
        fx.base_url.replacen("http://", "ws://", 1)
    );
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws.send(Message::Text("not json".into())).await.unwrap();

    let frame = tokio::time::timeout(WAIT, ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match frame {
        Message::Close(Some(close)) => assert_eq!(close.code, CloseCode::Policy),
        other => panic!("expected close frame, got {other:?}"),
    }
    assert!(fx.server.registry().is_empty().await);
}
