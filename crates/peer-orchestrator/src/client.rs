//! Hub connection with automatic reconnection.
//!
//! [`HubClient`] owns the WebSocket. The orchestrator sees it as a
//! [`HubChannel`]: a queue of outbound [`ClientMessage`]s and a stream of
//! [`HubEvent`]s (decoded hub frames plus connectivity changes). Messages
//! queued while the socket is down are discarded on reconnect; the hub
//! assigns a new participant id per connection, so they would be stale.

use crate::config::ReconnectPolicy;
use crate::errors::TransportError;
use common::protocol::{ClientMessage, ServerMessage};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Outbound and inbound queue depth.
pub const HUB_CHANNEL_BUFFER: usize = 256;

/// Largest hub frame the client accepts.
const MAX_INBOUND_FRAME: usize = 1024 * 1024;

type HubSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connectivity of the hub channel as shown to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectivityStatus {
    #[default]
    Connecting,
    Connected,
    Reconnecting {
        attempt: u32,
    },
    Disconnected,
}

/// Event delivered by the hub channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    Status(ConnectivityStatus),
    Message(ServerMessage),
}

/// Orchestrator side of the hub connection.
pub struct HubChannel {
    pub outbound: mpsc::Sender<ClientMessage>,
    pub events: mpsc::Receiver<HubEvent>,
}

/// Far side of a [`HubChannel`], for driving an orchestrator without a hub.
pub struct HubEndpoint {
    pub outbound: mpsc::Receiver<ClientMessage>,
    pub events: mpsc::Sender<HubEvent>,
}

impl HubChannel {
    /// An in-memory channel pair.
    #[must_use]
    pub fn pair(buffer: usize) -> (HubChannel, HubEndpoint) {
        let (outbound_tx, outbound_rx) = mpsc::channel(buffer);
        let (events_tx, events_rx) = mpsc::channel(buffer);
        (
            HubChannel {
                outbound: outbound_tx,
                events: events_rx,
            },
            HubEndpoint {
                outbound: outbound_rx,
                events: events_tx,
            },
        )
    }
}

enum PumpExit {
    /// Socket dropped; reconnect.
    Lost,
    /// Cancelled or the orchestrator went away; stop.
    Stop,
}

/// WebSocket client task for one participant.
pub struct HubClient {
    url: String,
    policy: ReconnectPolicy,
    endpoint: HubEndpoint,
    cancel_token: CancellationToken,
}

impl HubClient {
    /// Spawn the client. It connects immediately and keeps reconnecting
    /// until cancelled, the orchestrator drops its channel, or the policy
    /// gives up.
    #[must_use]
    pub fn spawn(
        url: String,
        policy: ReconnectPolicy,
        cancel_token: CancellationToken,
    ) -> (HubChannel, JoinHandle<()>) {
        let (channel, endpoint) = HubChannel::pair(HUB_CHANNEL_BUFFER);
        let client = Self {
            url,
            policy,
            endpoint,
            cancel_token,
        };
        let task = tokio::spawn(client.run());
        (channel, task)
    }

    #[instrument(skip_all, name = "peer.hub_client", fields(url = %self.url))]
    async fn run(mut self) {
        let mut attempt: u32 = 0;
        if !self.publish(ConnectivityStatus::Connecting).await {
            return;
        }

        loop {
            let connected = tokio::select! {
                () = self.cancel_token.cancelled() => break,
                result = connect_async(self.url.as_str()) => result,
            };

            match connected {
                Ok((socket, _)) => {
                    self.discard_stale_outbound();
                    attempt = 0;
                    info!(target: "peer.hub_client", "Connected to hub");
                    if !self.publish(ConnectivityStatus::Connected).await {
                        return;
                    }
                    match self.pump(socket).await {
                        PumpExit::Stop => break,
                        PumpExit::Lost => {
                            warn!(target: "peer.hub_client", "Hub connection lost");
                        }
                    }
                }
                Err(e) => {
                    let err = TransportError::Connect(e.to_string());
                    warn!(target: "peer.hub_client", attempt, error = %err, "Hub connect failed");
                }
            }

            attempt = attempt.saturating_add(1);
            if !self.policy.allows(attempt) {
                warn!(target: "peer.hub_client", attempt, "Giving up on hub reconnection");
                break;
            }
            if !self.publish(ConnectivityStatus::Reconnecting { attempt }).await {
                return;
            }

            let delay = self.policy.delay(attempt);
            debug!(
                target: "peer.hub_client",
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Waiting before reconnect"
            );
            tokio::select! {
                () = self.cancel_token.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        let _ = self
            .endpoint
            .events
            .send(HubEvent::Status(ConnectivityStatus::Disconnected))
            .await;
        info!(target: "peer.hub_client", "Hub client stopped");
    }

    async fn pump(&mut self, mut socket: HubSocket) -> PumpExit {
        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    let _ = socket.close(None).await;
                    return PumpExit::Stop;
                }

                outbound = self.endpoint.outbound.recv() => {
                    let Some(message) = outbound else {
                        // Orchestrator gone
                        let _ = socket.close(None).await;
                        return PumpExit::Stop;
                    };
                    let text = match message.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(target: "peer.hub_client", error = %e, "Dropping unencodable frame");
                            continue;
                        }
                    };
                    if let Err(e) = socket.send(Message::Text(text)).await {
                        debug!(target: "peer.hub_client", error = %e, "Send failed");
                        return PumpExit::Lost;
                    }
                }

                inbound = socket.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => {
                            match ServerMessage::from_json(&text, MAX_INBOUND_FRAME) {
                                Ok(message) => {
                                    if self.endpoint.events.send(HubEvent::Message(message)).await.is_err() {
                                        let _ = socket.close(None).await;
                                        return PumpExit::Stop;
                                    }
                                }
                                Err(e) => {
                                    let err = TransportError::from(e);
                                    warn!(target: "peer.hub_client", error = %err, "Ignoring undecodable hub frame");
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => return PumpExit::Lost,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!(target: "peer.hub_client", error = %e, "Receive failed");
                            return PumpExit::Lost;
                        }
                    }
                }
            }
        }
    }

    fn discard_stale_outbound(&mut self) {
        let mut discarded = 0usize;
        while self.endpoint.outbound.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!(target: "peer.hub_client", discarded, "Discarded frames queued while offline");
        }
    }

    async fn publish(&self, status: ConnectivityStatus) -> bool {
        self.endpoint.events.send(HubEvent::Status(status)).await.is_ok()
    }
}
