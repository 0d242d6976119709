//! WebSocket client for connecting to a ComfyUI instance.
//!
//! [`ComfyUIClient`] holds the connection configuration for a single
//! ComfyUI instance.  Call [`ComfyUIClient::connect`] to open a live
//! socket scoped to one job's `client_id`.

use std::time::Duration;

use tokio_tungstenite::{connect_async, MaybeTlsStream};

/// Raw WebSocket stream type used for ComfyUI connections.
pub type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for a ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ComfyUIClient {
    ws_url: String,
    connect_timeout: Option<Duration>,
}

impl ComfyUIClient {
    /// Create a new client targeting a specific ComfyUI instance.
    ///
    /// * `ws_url`          - WebSocket base URL, e.g. `ws://host:8188`.
    /// * `connect_timeout` - bound on the handshake; `None` waits forever.
    pub fn new(ws_url: String, connect_timeout: Option<Duration>) -> Self {
        Self {
            ws_url,
            connect_timeout,
        }
    }

    /// Connect to the ComfyUI WebSocket endpoint for `client_id`.
    ///
    /// ComfyUI addresses progress and result messages for prompts
    /// submitted with this `client_id` to this socket only.
    pub async fn connect(&self, client_id: &str) -> Result<WsStream, ComfyUIClientError> {
        let url = format!("{}/ws?clientId={}", self.ws_url, client_id);

        let handshake = connect_async(&url);
        let result = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, handshake)
                .await
                .map_err(|_| ComfyUIClientError::Timeout(limit))?,
            None => handshake.await,
        };

        let (ws_stream, _response) = result.map_err(|e| {
            ComfyUIClientError::Connection(format!(
                "Failed to connect to ComfyUI at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::info!(client_id = %client_id, "Connected to ComfyUI at {}", self.ws_url);

        Ok(ws_stream)
    }
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Failed to establish the initial WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The handshake did not finish within the connect timeout.
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),
}
