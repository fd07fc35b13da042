//! WebSocket client for one correlation scope.
//!
//! [`ChannelClient`] holds the connection configuration for a single
//! project scope. Call [`ChannelClient::connect`] to establish a live
//! [`ChannelConnection`]: the connect attempt is time-boxed, and the
//! `subscribe` control frame is sent before the connection is handed
//! back, so callers only ever see a fully subscribed stream.

use std::time::Duration;

use futures::SinkExt;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream};

use medley_core::types::ProjectId;

use crate::messages::subscribe_frame;

/// Default ceiling on how long a single connect attempt may take.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration handle for one scope's streaming connection.
pub struct ChannelClient {
    project_id: ProjectId,
    ws_base_url: String,
    connect_timeout: Duration,
}

/// A live, subscribed WebSocket connection for one scope.
pub struct ChannelConnection {
    /// The scope this connection is subscribed to.
    pub project_id: ProjectId,
    /// Unique client ID sent during the WebSocket handshake.
    pub client_id: String,
    /// The raw WebSocket stream for reading frames.
    pub ws_stream: tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

impl ChannelClient {
    /// Create a client for `project_id` against a WebSocket base URL,
    /// e.g. `ws://host:3000`.
    pub fn new(project_id: impl Into<ProjectId>, ws_base_url: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ws_base_url: ws_base_url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Override the per-attempt connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Establish the WebSocket connection and send the `subscribe`
    /// control frame.
    ///
    /// Generates a unique `clientId` (UUID v4) and appends it as a
    /// query parameter so the server can address messages back to this
    /// specific client.
    pub async fn connect(&self) -> Result<ChannelConnection, ChannelError> {
        let client_id = uuid::Uuid::new_v4().to_string();
        let url = format!(
            "{}/ws/project.{}?clientId={}",
            self.ws_base_url, self.project_id, client_id
        );

        let connect = tokio::time::timeout(self.connect_timeout, connect_async(&url));
        let (mut ws_stream, _response) = match connect.await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                return Err(ChannelError::Connection(format!(
                    "Failed to connect to {}: {e}",
                    self.ws_base_url
                )));
            }
            Err(_) => {
                return Err(ChannelError::Connection(format!(
                    "Connect to {} timed out after {:?}",
                    self.ws_base_url, self.connect_timeout
                )));
            }
        };

        ws_stream
            .send(Message::Text(subscribe_frame(&self.project_id)))
            .await
            .map_err(|e| ChannelError::Connection(format!("Failed to send subscribe frame: {e}")))?;

        tracing::info!(
            project_id = %self.project_id,
            client_id = %client_id,
            "Connected and subscribed to project channel",
        );

        Ok(ChannelConnection {
            project_id: self.project_id.clone(),
            client_id,
            ws_stream,
        })
    }
}

/// Errors from the channel layer.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Failed to establish the WebSocket connection (or it closed
    /// uncleanly). Retried per the reconnect policy, then surfaced as
    /// "disconnected".
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an established connection. Dropped
    /// and logged, never fatal.
    #[error("Protocol error: {0}")]
    Protocol(String),
}
