//! WebSocket test client
//!
//! Speaks the JSON event protocol against a `TestPartyServer`.

use crate::server_harness::TestPartyServer;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use watchmate_service::protocol::ServerEvent;

/// How long `recv_*` waits for a frame before failing the test.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A connected WebSocket client.
pub struct TestClient {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    connection_id: Option<String>,
}

impl TestClient {
    /// Open a WebSocket to the server's `/ws` endpoint
    pub async fn connect(server: &TestPartyServer) -> Result<Self, anyhow::Error> {
        let (socket, _response) = connect_async(server.ws_url()).await?;
        Ok(Self {
            socket,
            connection_id: None,
        })
    }

    /// Server-assigned connection id, known after a successful join
    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    /// Send a raw JSON value as a text frame
    pub async fn send_json(&mut self, value: &Value) -> Result<(), anyhow::Error> {
        self.send_text(value.to_string()).await
    }

    /// Send an arbitrary text frame (for malformed-input tests)
    pub async fn send_text(&mut self, text: String) -> Result<(), anyhow::Error> {
        self.socket.send(Message::Text(text)).await?;
        Ok(())
    }

    /// Send `join-room` and wait for the `joined` acknowledgement.
    ///
    /// Returns `isHost` from the acknowledgement.
    pub async fn join(
        &mut self,
        room_code: &str,
        display_name: &str,
        host_token: Option<&str>,
    ) -> Result<bool, anyhow::Error> {
        self.send_json(&json!({
            "type": "join-room",
            "roomCode": room_code,
            "displayName": display_name,
            "hostToken": host_token,
        }))
        .await?;

        match self.recv_event().await? {
            ServerEvent::Joined {
                connection_id,
                is_host,
                ..
            } => {
                self.connection_id = Some(connection_id);
                Ok(is_host)
            }
            other => Err(anyhow::anyhow!("expected joined, got {:?}", other)),
        }
    }

    /// Send a room-scoped event with no payload beyond `roomCode`
    pub async fn send_simple(&mut self, event_type: &str, room_code: &str) -> Result<(), anyhow::Error> {
        self.send_json(&json!({ "type": event_type, "roomCode": room_code }))
            .await
    }

    /// Receive the next server event
    pub async fn recv_event(&mut self) -> Result<ServerEvent, anyhow::Error> {
        self.recv_event_timeout(DEFAULT_RECV_TIMEOUT).await
    }

    /// Receive the next server event, failing after `timeout`
    pub async fn recv_event_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<ServerEvent, anyhow::Error> {
        loop {
            let frame = tokio::time::timeout(timeout, self.socket.next())
                .await
                .map_err(|_| anyhow::anyhow!("timed out waiting for server event"))?
                .ok_or_else(|| anyhow::anyhow!("socket closed"))??;

            match frame {
                Message::Text(text) => return Ok(serde_json::from_str(&text)?),
                Message::Close(frame) => {
                    return Err(anyhow::anyhow!("socket closed by server: {:?}", frame))
                }
                _ => continue,
            }
        }
    }

    /// Receive events until one matches `predicate`, returning it
    pub async fn recv_until<F>(&mut self, mut predicate: F) -> Result<ServerEvent, anyhow::Error>
    where
        F: FnMut(&ServerEvent) -> bool,
    {
        loop {
            let event = self.recv_event().await?;
            if predicate(&event) {
                return Ok(event);
            }
        }
    }

    /// Assert nothing arrives within `window` (drains pings/pongs)
    pub async fn expect_silence(&mut self, window: Duration) -> Result<(), anyhow::Error> {
        match self.recv_event_timeout(window).await {
            Ok(event) => Err(anyhow::anyhow!("expected silence, got {:?}", event)),
            Err(_) => Ok(()),
        }
    }

    /// Close the socket
    pub async fn close(mut self) -> Result<(), anyhow::Error> {
        self.socket.close(None).await?;
        Ok(())
    }
}
