//! WebSocket transport: `GET /ws`.
//!
//! Each upgraded socket gets a fresh [`ParticipantId`], a [`ConnectionActor`]
//! for inbound frames, and a writer task that drains the connection's
//! outbound queue onto the socket. The socket closes once every holder of
//! the outbound queue is gone (the connection actor has stopped and its
//! session has forgotten it).

use crate::actors::{ActorType, ConnectionActor, HubActorHandle, HubMetrics};
use crate::config::Limits;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use common::protocol::ServerMessage;
use common::types::ParticipantId;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Frames queued for one client before the hub starts dropping.
const OUTBOUND_BUFFER: usize = 256;

/// How long to wait for a connection actor to wind down after the socket closes.
const CONNECTION_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared state of the WebSocket router.
#[derive(Clone)]
pub struct WsState {
    pub hub: HubActorHandle,
    pub limits: Limits,
    pub metrics: Arc<HubMetrics>,
    /// Parent of every connection's cancellation token.
    pub shutdown: CancellationToken,
}

/// Router exposing the signaling WebSocket at `/ws`.
pub fn ws_router(state: WsState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let participant_id = ParticipantId::new();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER);

    info!(
        target: "hub.transport.ws",
        participant_id = %participant_id,
        "WebSocket connected"
    );

    let (connection, connection_task) = ConnectionActor::spawn(
        participant_id,
        state.hub.clone(),
        outbound,
        state.limits,
        state.shutdown.child_token(),
        Arc::clone(&state.metrics),
    );

    let mut writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(
                        target: "hub.transport.ws",
                        participant_id = %participant_id,
                        error = %e,
                        "Failed to encode outbound frame"
                    );
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                return;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    let mut writer_done = false;
    loop {
        tokio::select! {
            frame = ws_receiver.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(
                            target: "hub.transport.ws",
                            participant_id = %participant_id,
                            error = %e,
                            "WebSocket read failed"
                        );
                        break;
                    }
                };
                if connection.frame(text).await.is_err() {
                    // Actor stopped (oversized frame or shutdown).
                    break;
                }
            }

            _ = &mut writer => {
                writer_done = true;
                break;
            }
        }
    }

    let _ = connection.transport_closed().await;

    match tokio::time::timeout(CONNECTION_STOP_TIMEOUT, connection_task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) if e.is_panic() => {
            state.metrics.record_panic(ActorType::Connection);
        }
        Ok(Err(_)) => {}
        Err(_) => {
            warn!(
                target: "hub.transport.ws",
                participant_id = %participant_id,
                "Connection actor did not stop in time"
            );
            connection.cancel();
        }
    }

    if !writer_done {
        // The writer ends on its own once the outbound queue has no senders left.
        if tokio::time::timeout(CONNECTION_STOP_TIMEOUT, &mut writer)
            .await
            .is_err()
        {
            writer.abort();
        }
    }

    info!(
        target: "hub.transport.ws",
        participant_id = %participant_id,
        "WebSocket closed"
    );
}
