//! JSON WebSocket client for hub E2E tests.

use common::protocol::{ClientMessage, Member, ServerMessage};
use common::types::{ParticipantId, SessionKey};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Default wait for an expected frame.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Frames larger than this are not expected from the hub.
const MAX_INBOUND_FRAME: usize = 1024 * 1024;

/// One client connection to a test hub.
pub struct TestWsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestWsClient {
    /// Open a WebSocket to `url`.
    pub async fn connect(url: &str) -> Result<Self, anyhow::Error> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to {}: {}", url, e))?;
        Ok(Self { stream })
    }

    /// Send a protocol frame.
    pub async fn send(&mut self, message: &ClientMessage) -> Result<(), anyhow::Error> {
        let text = message.to_json()?;
        self.send_raw(text).await
    }

    /// Send an arbitrary text frame.
    pub async fn send_raw(&mut self, text: String) -> Result<(), anyhow::Error> {
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    /// Next protocol frame, or an error on timeout or close.
    pub async fn recv(&mut self) -> Result<ServerMessage, anyhow::Error> {
        self.recv_within(RECV_TIMEOUT).await
    }

    /// Next protocol frame within `timeout`.
    pub async fn recv_within(&mut self, timeout: Duration) -> Result<ServerMessage, anyhow::Error> {
        loop {
            let next = tokio::time::timeout(timeout, self.stream.next())
                .await
                .map_err(|_| anyhow::anyhow!("Timed out waiting for a frame"))?;
            match next {
                Some(Ok(Message::Text(text))) => {
                    return Ok(ServerMessage::from_json(&text, MAX_INBOUND_FRAME)?);
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => {
                    return Err(anyhow::anyhow!("Connection closed"));
                }
                Some(Ok(other)) => {
                    return Err(anyhow::anyhow!("Unexpected frame: {:?}", other));
                }
                Some(Err(e)) => return Err(anyhow::anyhow!("WebSocket error: {}", e)),
            }
        }
    }

    /// Whether the hub closes the connection within `timeout`.
    pub async fn closed_within(&mut self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.stream.next()).await {
                Err(_) => return false,
                Ok(None | Some(Err(_) | Ok(Message::Close(_)))) => return true,
                Ok(Some(Ok(_))) => continue,
            }
        }
    }

    /// Join `session_key` and return the assigned id and membership.
    ///
    /// # Panics
    ///
    /// Panics if the hub does not answer with `joined`.
    pub async fn join(&mut self, session_key: &str, display_name: &str) -> (ParticipantId, Vec<Member>) {
        self.send(&ClientMessage::Join {
            session_key: SessionKey::new(session_key),
            display_name: display_name.to_string(),
        })
        .await
        .expect("join frame should send");

        match self.recv().await.expect("joined reply expected") {
            ServerMessage::Joined {
                participant_id,
                members,
            } => (participant_id, members),
            other => panic!("Expected joined, got {other:?}"),
        }
    }

    /// Assert that no frame arrives within `window`.
    ///
    /// # Panics
    ///
    /// Panics if a frame arrives.
    pub async fn expect_silence(&mut self, window: Duration) {
        if let Ok(message) = self.recv_within(window).await {
            panic!("Expected no frame, got {message:?}");
        }
    }

    /// Drop the connection without sending `leave`.
    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}
