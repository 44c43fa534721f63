//! Replica-side client for the coordinator's agent protocol.
//!
//! A replica [`subscribe`](AgentClient::subscribe)s once and then reads
//! commands from the returned [`CommandStream`] for as long as it runs.
//! Status is reported separately with [`report`](AgentClient::report);
//! a failed report returns an error so the caller can retry.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use mlplane_proto::agent::v1::{
    AgentSubscribeRequest, ModelEventMessage, ModelEventResponse, ModelOperationMessage,
};
use mlplane_proto::ProtoError;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

const SUBSCRIBE_PATH: &str = "/v1/agent/subscribe";
const EVENTS_PATH: &str = "/v1/agent/events";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid coordinator URL: {0}")]
    InvalidUrl(String),

    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error("coordinator rejected report ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Client for one coordinator.
#[derive(Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    base_url: String,
}

impl AgentClient {
    /// `base_url` is the coordinator's HTTP root, e.g. `http://127.0.0.1:9005`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Opens the command stream and sends the subscribe request.
    pub async fn subscribe(
        &self,
        request: &AgentSubscribeRequest,
    ) -> Result<CommandStream, ClientError> {
        let url = self.ws_url()?;
        let (mut ws, _) = tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(&url))
            .await
            .map_err(|_| ClientError::ConnectTimeout(url.clone()))??;

        let frame = mlplane_proto::encode(request)?;
        ws.send(Message::Text(frame.into())).await?;
        debug!(
            server = %request.server_name,
            replica_idx = request.replica_idx,
            "Subscribed to coordinator"
        );

        Ok(CommandStream { ws })
    }

    /// Reports a model event for this replica.
    pub async fn report(&self, event: &ModelEventMessage) -> Result<ModelEventResponse, ClientError> {
        let url = format!("{}{}", self.base_url, EVENTS_PATH);
        let response = self.http.post(&url).json(event).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Rejected { status, body });
        }

        Ok(response.json().await?)
    }

    fn ws_url(&self) -> Result<String, ClientError> {
        if let Some(rest) = self.base_url.strip_prefix("https://") {
            Ok(format!("wss://{rest}{SUBSCRIBE_PATH}"))
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            Ok(format!("ws://{rest}{SUBSCRIBE_PATH}"))
        } else {
            Err(ClientError::InvalidUrl(self.base_url.clone()))
        }
    }
}

/// Commands pushed by the coordinator.
pub struct CommandStream {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl CommandStream {
    /// Waits for the next command. `Ok(None)` means the coordinator closed
    /// the stream.
    pub async fn next_command(&mut self) -> Result<Option<ModelOperationMessage>, ClientError> {
        while let Some(frame) = self.ws.next().await {
            match frame? {
                Message::Text(text) => return Ok(Some(mlplane_proto::decode(text.as_str())?)),
                Message::Close(_) => return Ok(None),
                _ => continue,
            }
        }
        Ok(None)
    }

    /// Closes the stream; the coordinator treats this as a disconnect.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.ws.close(None).await?;
        Ok(())
    }
}
