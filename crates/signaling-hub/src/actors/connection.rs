//! `ConnectionActor` - one actor per WebSocket connection.
//!
//! Each `ConnectionActor`:
//! - Owns the connection-scoped [`ParticipantId`] assigned at accept time
//! - Decodes and validates inbound frames, then forwards them to the hub or
//!   to its session
//! - Answers invalid requests with an `error` frame and keeps going; only an
//!   oversized frame ends the connection
//! - Leaves its session when the transport closes
//!
//! Frames *to* the client do not pass through this actor: session actors
//! push them straight onto the [`Outbound`] writer queue.

use crate::config::Limits;
use crate::errors::HubError;
use crate::observability::metrics as prom;

use super::hub::HubActorHandle;
use super::messages::{ConnectionMessage, Outbound};
use super::metrics::{ActorType, HubMetrics, MailboxMonitor};
use super::session::SessionActorHandle;

use common::error::ProtocolError;
use common::protocol::{ClientMessage, ServerMessage};
use common::types::{ParticipantId, SessionKey};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the connection mailbox.
const CONNECTION_CHANNEL_BUFFER: usize = 200;

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    participant_id: ParticipantId,
}

impl ConnectionActorHandle {
    #[must_use]
    pub fn participant_id(&self) -> ParticipantId {
        self.participant_id
    }

    /// Hand a raw text frame to the actor.
    pub async fn frame(&self, text: String) -> Result<(), HubError> {
        self.sender
            .send(ConnectionMessage::Frame { text })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))
    }

    /// Report that the transport is gone.
    pub async fn transport_closed(&self) -> Result<(), HubError> {
        self.sender
            .send(ConnectionMessage::TransportClosed)
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Session the connection has joined.
struct Joined {
    session_key: SessionKey,
    session: SessionActorHandle,
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor {
    participant_id: ParticipantId,
    receiver: mpsc::Receiver<ConnectionMessage>,
    cancel_token: CancellationToken,
    hub: HubActorHandle,
    outbound: Outbound,
    limits: Limits,
    joined: Option<Joined>,
    metrics: Arc<HubMetrics>,
    mailbox: MailboxMonitor,
}

impl ConnectionActor {
    /// Spawn a new connection actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        participant_id: ParticipantId,
        hub: HubActorHandle,
        outbound: Outbound,
        limits: Limits,
        cancel_token: CancellationToken,
        metrics: Arc<HubMetrics>,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);

        metrics.connection_opened();

        let actor = Self {
            participant_id,
            receiver,
            cancel_token: cancel_token.clone(),
            hub,
            outbound,
            limits,
            joined: None,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Connection, participant_id.to_string()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            cancel_token,
            participant_id,
        };

        (handle, task_handle)
    }

    #[instrument(
        skip_all,
        name = "hub.actor.connection",
        fields(participant_id = %self.participant_id)
    )]
    async fn run(mut self) {
        debug!(
            target: "hub.actor.connection",
            participant_id = %self.participant_id,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    // Hub is draining; sessions are cancelled alongside us, so
                    // nobody is left to notify.
                    debug!(
                        target: "hub.actor.connection",
                        participant_id = %self.participant_id,
                        "ConnectionActor received cancellation signal"
                    );
                    let _ = self
                        .outbound
                        .try_send(error_frame(&HubError::Draining));
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.observe(self.receiver.len());
                            let should_exit = self.handle_message(message).await;

                            if should_exit {
                                self.leave_session().await;
                                break;
                            }
                        }
                        None => {
                            self.leave_session().await;
                            break;
                        }
                    }
                }
            }
        }

        self.metrics.connection_closed();

        info!(
            target: "hub.actor.connection",
            participant_id = %self.participant_id,
            messages_processed = self.mailbox.processed(),
            "ConnectionActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Frame { text } => self.handle_frame(&text).await,
            ConnectionMessage::TransportClosed => {
                debug!(
                    target: "hub.actor.connection",
                    participant_id = %self.participant_id,
                    "Transport closed"
                );
                true
            }
        }
    }

    async fn handle_frame(&mut self, text: &str) -> bool {
        let started = Instant::now();

        let message = match ClientMessage::from_json(text, self.limits.max_frame_bytes) {
            Ok(message) => message,
            Err(e) => {
                let fatal = matches!(e, ProtocolError::FrameTooLarge { .. });
                warn!(
                    target: "hub.actor.connection",
                    participant_id = %self.participant_id,
                    frame_len = text.len(),
                    fatal,
                    error = %e,
                    "Rejected inbound frame"
                );
                prom::record_message_dropped(if fatal { "oversized" } else { "malformed" });
                self.reply(error_frame(&HubError::Protocol(e))).await;
                return fatal;
            }
        };

        let kind = message.kind();
        if let Err(e) = self.handle_client_message(message).await {
            debug!(
                target: "hub.actor.connection",
                participant_id = %self.participant_id,
                kind,
                error = %e,
                "Request rejected"
            );
            self.reply(error_frame(&e)).await;
        }
        prom::record_message_latency(kind, started.elapsed());

        false
    }

    async fn handle_client_message(&mut self, message: ClientMessage) -> Result<(), HubError> {
        match message {
            ClientMessage::Join {
                session_key,
                display_name,
            } => self.handle_join(session_key, display_name).await,

            ClientMessage::Signal {
                recipient_id,
                payload,
            } => {
                let joined = self.joined.as_ref().ok_or(HubError::NotJoined)?;
                joined
                    .session
                    .relay(self.participant_id, recipient_id, payload)
                    .await
            }

            ClientMessage::Chat { text } => {
                let joined = self.joined.as_ref().ok_or(HubError::NotJoined)?;
                if text.len() > self.limits.max_chat_length {
                    return Err(HubError::InvalidRequest(format!(
                        "Chat text exceeds {} bytes",
                        self.limits.max_chat_length
                    )));
                }
                joined.session.chat(self.participant_id, text).await
            }

            ClientMessage::Leave => {
                if self.joined.is_none() {
                    return Err(HubError::NotJoined);
                }
                self.leave_session().await;
                Ok(())
            }
        }
    }

    async fn handle_join(
        &mut self,
        session_key: SessionKey,
        display_name: String,
    ) -> Result<(), HubError> {
        if session_key.is_blank() {
            prom::record_join("invalid");
            return Err(HubError::InvalidRequest(
                "Session key must not be empty".to_string(),
            ));
        }
        if session_key.len() > self.limits.max_session_key_length {
            prom::record_join("invalid");
            return Err(HubError::InvalidRequest(format!(
                "Session key exceeds {} bytes",
                self.limits.max_session_key_length
            )));
        }
        if display_name.chars().count() > self.limits.max_display_name_length {
            prom::record_join("invalid");
            return Err(HubError::InvalidRequest(format!(
                "Display name exceeds {} characters",
                self.limits.max_display_name_length
            )));
        }
        if let Some(joined) = &self.joined {
            if joined.session_key != session_key {
                prom::record_join("conflict");
                return Err(HubError::Conflict(
                    "Connection already joined another session".to_string(),
                ));
            }
        }

        let outcome = self
            .hub
            .join(
                session_key.clone(),
                self.participant_id,
                display_name,
                self.outbound.clone(),
            )
            .await?;

        info!(
            target: "hub.actor.connection",
            participant_id = %self.participant_id,
            session_key = %session_key,
            member_count = outcome.result.members.len(),
            newly_joined = outcome.result.newly_joined,
            "Joined session"
        );

        // The session actor already queued the `joined` frame on our outbound.
        self.joined = Some(Joined {
            session_key,
            session: outcome.session,
        });

        Ok(())
    }

    async fn leave_session(&mut self) {
        let Some(joined) = self.joined.take() else {
            return;
        };

        if let Err(e) = self
            .hub
            .leave(joined.session_key.clone(), self.participant_id)
            .await
        {
            warn!(
                target: "hub.actor.connection",
                participant_id = %self.participant_id,
                session_key = %joined.session_key,
                error = %e,
                "Failed to leave session"
            );
        }
    }

    async fn reply(&self, message: ServerMessage) {
        if self.outbound.send(message).await.is_err() {
            prom::record_message_dropped("writer_closed");
        }
    }
}

fn error_frame(error: &HubError) -> ServerMessage {
    ServerMessage::Error {
        code: error.error_code(),
        message: error.client_message(),
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::store::InMemorySessionStore;
    use common::protocol::error_codes;
    use std::time::Duration;

    struct Harness {
        hub: HubActorHandle,
        metrics: Arc<HubMetrics>,
        limits: Limits,
    }

    struct TestConnection {
        handle: ConnectionActorHandle,
        task: JoinHandle<()>,
        inbox: mpsc::Receiver<ServerMessage>,
    }

    impl Harness {
        fn new(limits: Limits) -> Self {
            let metrics = HubMetrics::new();
            let hub = HubActorHandle::new(
                "hub-test".to_string(),
                Arc::new(InMemorySessionStore::new()),
                limits,
                Arc::clone(&metrics),
            );
            Self {
                hub,
                metrics,
                limits,
            }
        }

        fn connect(&self) -> TestConnection {
            let (outbound, inbox) = mpsc::channel(32);
            let (handle, task) = ConnectionActor::spawn(
                ParticipantId::new(),
                self.hub.clone(),
                outbound,
                self.limits,
                self.hub.child_token(),
                Arc::clone(&self.metrics),
            );
            TestConnection {
                handle,
                task,
                inbox,
            }
        }
    }

    impl TestConnection {
        async fn send(&self, frame: &str) {
            self.handle.frame(frame.to_string()).await.unwrap();
        }

        async fn join(&mut self, key: &str, name: &str) -> ServerMessage {
            self.send(&format!(
                r#"{{"type":"join","session_key":"{key}","display_name":"{name}"}}"#
            ))
            .await;
            self.recv().await
        }

        async fn recv(&mut self) -> ServerMessage {
            tokio::time::timeout(Duration::from_secs(1), self.inbox.recv())
                .await
                .expect("timed out waiting for frame")
                .expect("writer queue closed")
        }

        async fn expect_error(&mut self, code: i32) {
            match self.recv().await {
                ServerMessage::Error { code: c, .. } => assert_eq!(c, code),
                other => panic!("expected error frame, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_join_replies_with_own_id() {
        let harness = Harness::new(Limits::default());
        let mut a = harness.connect();

        match a.join("/room1", "alice").await {
            ServerMessage::Joined {
                participant_id,
                members,
            } => {
                assert_eq!(participant_id, a.handle.participant_id());
                assert_eq!(members.len(), 1);
                assert_eq!(members[0].display_name, "alice");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        assert_eq!(harness.metrics.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_connection_open() {
        let harness = Harness::new(Limits::default());
        let mut a = harness.connect();

        a.send("not json").await;
        a.expect_error(error_codes::INVALID_REQUEST).await;

        // Still usable afterwards.
        assert!(matches!(
            a.join("/room1", "alice").await,
            ServerMessage::Joined { .. }
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_connection() {
        let limits = Limits {
            max_frame_bytes: 64,
            ..Limits::default()
        };
        let harness = Harness::new(limits);
        let mut a = harness.connect();

        a.send(&"x".repeat(65)).await;
        a.expect_error(error_codes::INVALID_REQUEST).await;

        tokio::time::timeout(Duration::from_secs(1), a.task)
            .await
            .expect("actor should stop")
            .expect("actor should not panic");
        assert_eq!(harness.metrics.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_signal_before_join_rejected() {
        let harness = Harness::new(Limits::default());
        let mut a = harness.connect();

        a.send(&format!(
            r#"{{"type":"signal","recipient_id":"{}","payload":"x"}}"#,
            ParticipantId::new()
        ))
        .await;
        a.expect_error(error_codes::NOT_FOUND).await;

        a.send(r#"{"type":"chat","text":"hi"}"#).await;
        a.expect_error(error_codes::NOT_FOUND).await;
    }

    #[tokio::test]
    async fn test_second_session_on_one_connection_conflicts() {
        let harness = Harness::new(Limits::default());
        let mut a = harness.connect();

        a.join("/room1", "alice").await;
        a.send(r#"{"type":"join","session_key":"/room2","display_name":"alice"}"#)
            .await;
        a.expect_error(error_codes::CONFLICT).await;
    }

    #[tokio::test]
    async fn test_validation_limits() {
        let limits = Limits {
            max_display_name_length: 4,
            max_chat_length: 3,
            ..Limits::default()
        };
        let harness = Harness::new(limits);
        let mut a = harness.connect();

        a.send(r#"{"type":"join","session_key":"  ","display_name":"al"}"#)
            .await;
        a.expect_error(error_codes::INVALID_REQUEST).await;

        a.send(r#"{"type":"join","session_key":"/r","display_name":"alexandra"}"#)
            .await;
        a.expect_error(error_codes::INVALID_REQUEST).await;

        a.join("/r", "al").await;
        a.send(r#"{"type":"chat","text":"toolong"}"#).await;
        a.expect_error(error_codes::INVALID_REQUEST).await;
    }

    #[tokio::test]
    async fn test_transport_close_notifies_peers() {
        let harness = Harness::new(Limits::default());
        let mut a = harness.connect();
        let mut b = harness.connect();

        a.join("/room1", "alice").await;
        b.join("/room1", "bob").await;
        assert!(matches!(
            a.recv().await,
            ServerMessage::ParticipantJoined { .. }
        ));

        let b_id = b.handle.participant_id();
        b.handle.transport_closed().await.unwrap();

        match a.recv().await {
            ServerMessage::ParticipantLeft { participant_id } => assert_eq!(participant_id, b_id),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_explicit_leave_keeps_connection() {
        let harness = Harness::new(Limits::default());
        let mut a = harness.connect();
        let mut b = harness.connect();

        a.join("/room1", "alice").await;
        b.join("/room1", "bob").await;
        let _ = a.recv().await;

        b.send(r#"{"type":"leave"}"#).await;
        assert!(matches!(
            a.recv().await,
            ServerMessage::ParticipantLeft { .. }
        ));

        // The connection may join a different session afterwards.
        assert!(matches!(
            b.join("/room2", "bob").await,
            ServerMessage::Joined { .. }
        ));
        assert!(!b.task.is_finished());
    }
}
