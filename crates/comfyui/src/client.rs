//! WebSocket client for connecting to a ComfyUI instance.
//!
//! [`ComfyUIClient`] holds the connection configuration for a single
//! ComfyUI instance.  Call [`ComfyUIClient::connect`] to establish a
//! live [`ComfyUIConnection`] over WebSocket.

use tokio_tungstenite::{connect_async, MaybeTlsStream};

/// The raw WebSocket stream type produced by [`ComfyUIClient::connect`].
pub type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for a ComfyUI instance.
///
/// Stores the WebSocket and HTTP API URLs needed to communicate with
/// one ComfyUI server.
#[derive(Debug, Clone)]
pub struct ComfyUIClient {
    ws_url: String,
    api_url: String,
}

/// A live WebSocket connection to a ComfyUI instance.
pub struct ComfyUIConnection {
    /// Client ID sent during the WebSocket handshake.
    pub client_id: String,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: WsStream,
}

impl std::fmt::Debug for ComfyUIConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComfyUIConnection")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl ComfyUIClient {
    /// Create a new client targeting a specific ComfyUI instance.
    ///
    /// * `ws_url`  - WebSocket base URL, e.g. `ws://host:8188`.
    /// * `api_url` - HTTP base URL, e.g. `http://host:8188`.
    pub fn new(ws_url: String, api_url: String) -> Self {
        Self { ws_url, api_url }
    }

    /// Build both URLs from a host (or `host:port` pair) and port.
    ///
    /// ```
    /// use vidgen_comfyui::client::ComfyUIClient;
    ///
    /// let client = ComfyUIClient::for_address("127.0.0.1", 8188);
    /// assert_eq!(client.api_url(), "http://127.0.0.1:8188");
    /// ```
    pub fn for_address(host: &str, port: u16) -> Self {
        Self::new(
            format!("ws://{host}:{port}"),
            format!("http://{host}:{port}"),
        )
    }

    /// HTTP API base URL (e.g. `http://host:8188`).
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Connect to the ComfyUI WebSocket endpoint as `client_id`.
    ///
    /// The ID is appended as a query parameter so that ComfyUI
    /// addresses progress messages for prompts submitted with the same
    /// ID back to this connection.
    pub async fn connect(&self, client_id: &str) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let url = format!("{}/ws?clientId={}", self.ws_url, client_id);

        let (ws_stream, _response) = connect_async(&url).await.map_err(|e| {
            ComfyUIClientError::Connection(format!(
                "Failed to connect to ComfyUI at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::info!(
            client_id = %client_id,
            "Connected to ComfyUI at {}",
            self.ws_url,
        );

        Ok(ComfyUIConnection {
            client_id: client_id.to_string(),
            ws_stream,
        })
    }
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = ComfyUIClient::for_address("127.0.0.1", port);
        assert_matches!(
            client.connect("client-x").await,
            Err(ComfyUIClientError::Connection(msg)) if msg.contains("127.0.0.1")
        );
    }

    #[tokio::test]
    async fn connect_sends_client_id_in_query() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut seen_uri = String::new();
            let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                seen_uri = req.uri().to_string();
                Ok(resp)
            };
            let _ws = tokio_tungstenite::accept_hdr_async(stream, callback)
                .await
                .unwrap();
            seen_uri
        });

        let client = ComfyUIClient::for_address("127.0.0.1", port);
        let conn = client.connect("abc-123").await.unwrap();
        assert_eq!(conn.client_id, "abc-123");

        let uri = server.await.unwrap();
        assert_eq!(uri, "/ws?clientId=abc-123");
    }
}
