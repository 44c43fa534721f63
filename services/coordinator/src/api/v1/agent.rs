//! Replica-facing endpoints.
//!
//! - GET /v1/agent/subscribe (WebSocket command stream)
//! - POST /v1/agent/events (status reports)
//!
//! The first text frame on the subscribe socket is the replica's
//! `AgentSubscribeRequest`. Every later frame the coordinator sends is one
//! JSON `ModelOperationMessage`. The socket closing in either direction
//! ends the subscription.

use std::time::Duration;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures_util::{stream::SplitStream, SinkExt, StreamExt};
use mlplane_proto::agent::v1::{AgentSubscribeRequest, ModelEventMessage, ModelEventResponse};
use tracing::{debug, error, info, warn};

use crate::api::error::{header_request_id, ApiError};
use crate::handler::CloseReason;
use crate::state::AppState;

/// How long a new socket may take to send its subscribe request.
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/subscribe", get(subscribe))
        .route("/events", post(agent_event))
}

async fn subscribe(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let request_id = header_request_id(&headers);
    ws.on_upgrade(move |socket| handle_agent_socket(socket, state, request_id))
}

async fn handle_agent_socket(socket: WebSocket, state: AppState, request_id: String) {
    let (mut sender, mut receiver) = socket.split();

    let request = match read_subscribe_request(&mut receiver).await {
        Ok(request) => request,
        Err(reason) => {
            warn!(request_id = %request_id, reason, "Rejecting replica subscription");
            let _ = sender.send(close_message(close_code::POLICY, reason)).await;
            return;
        }
    };
    let replica = request.replica_key();
    info!(request_id = %request_id, replica = %replica, "Replica stream opened");

    let server = state.server().clone();
    let (sink, mut commands) = server.command_channel();

    // Drains the replica's queue until the sink is dropped by the registry,
    // then closes the socket.
    let writer_replica = replica.clone();
    let writer = tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            let frame = match mlplane_proto::encode(&command) {
                Ok(frame) => frame,
                Err(e) => {
                    error!(replica = %writer_replica, error = %e, "Failed to encode command");
                    continue;
                }
            };
            if let Err(e) = sender.send(Message::Text(frame.into())).await {
                warn!(replica = %writer_replica, error = %e, "Failed to write command to replica");
                return;
            }
        }
        let _ = sender
            .send(close_message(close_code::NORMAL, "stream closed"))
            .await;
    });

    let reader_replica = replica.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(frame) = receiver.next().await {
            match frame {
                Ok(Message::Close(_)) => break,
                Ok(Message::Text(_)) | Ok(Message::Binary(_)) => {
                    debug!(replica = %reader_replica, "Ignoring unexpected frame from replica");
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Err(e) => {
                    debug!(replica = %reader_replica, error = %e, "Replica socket error");
                    break;
                }
            }
        }
    });

    let handler = match server.subscribe(&request, Box::new(sink)).await {
        Ok(handler) => handler,
        Err(e) => {
            error!(request_id = %request_id, replica = %replica, error = %e, "Replica subscription failed");
            reader.abort();
            let _ = writer.await;
            return;
        }
    };

    let reason = handler
        .run(async {
            let _ = (&mut reader).await;
        })
        .await;
    reader.abort();

    match reason {
        CloseReason::Explicit => info!(replica = %replica, "Replica stream closed"),
        CloseReason::PeerDisconnected { rescheduled, .. } => {
            info!(replica = %replica, rescheduled, "Replica stream ended by peer")
        }
    }
    let _ = writer.await;
}

async fn read_subscribe_request(
    receiver: &mut SplitStream<WebSocket>,
) -> Result<AgentSubscribeRequest, &'static str> {
    let frame = tokio::time::timeout(SUBSCRIBE_TIMEOUT, receiver.next())
        .await
        .map_err(|_| "subscribe request timed out")?;

    match frame {
        Some(Ok(Message::Text(text))) => {
            let request: AgentSubscribeRequest = mlplane_proto::decode(text.as_str())
                .map_err(|_| "malformed subscribe request")?;
            if request.server_name.is_empty() {
                return Err("server_name is required");
            }
            Ok(request)
        }
        Some(Ok(_)) => Err("expected a text subscribe request"),
        Some(Err(_)) | None => Err("stream ended before subscribe request"),
    }
}

fn close_message(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

async fn agent_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(message): Json<ModelEventMessage>,
) -> Result<Json<ModelEventResponse>, ApiError> {
    let request_id = header_request_id(&headers);

    let response = state.server().agent_event(&message).await.map_err(|e| {
        ApiError::internal("internal", e.to_string()).with_request_id(request_id)
    })?;
    Ok(Json(response))
}
