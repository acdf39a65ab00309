//! `SessionActor` - one actor per live session key.
//!
//! Every join, leave, relay and chat for a session is handled to completion
//! before the next, so members always observe membership changes in the
//! same order. Sessions never talk to each other.
//!
//! Membership order lives in the [`SessionStore`]; the writer queues of the
//! members live here, since they cannot leave the process.

use crate::errors::HubError;
use crate::observability::metrics as prom;
use crate::store::SessionStore;

use super::messages::{JoinResult, Outbound, SessionMessage, SessionState};
use super::metrics::{ActorType, HubMetrics, MailboxMonitor};

use common::protocol::{Member, ServerMessage};
use common::types::{ParticipantId, SessionKey};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the session mailbox.
const SESSION_CHANNEL_BUFFER: usize = 500;

/// Handle to a `SessionActor`.
#[derive(Debug, Clone)]
pub struct SessionActorHandle {
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
    session_key: SessionKey,
}

impl SessionActorHandle {
    #[must_use]
    pub fn session_key(&self) -> &SessionKey {
        &self.session_key
    }

    /// Add a participant, or return the current members if it already joined.
    pub async fn join(
        &self,
        participant_id: ParticipantId,
        display_name: String,
        outbound: Outbound,
    ) -> Result<JoinResult, HubError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SessionMessage::Join {
                participant_id,
                display_name,
                outbound,
                respond_to: tx,
            })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))?
    }

    /// Remove a participant. Returns the number of members remaining.
    pub async fn leave(&self, participant_id: ParticipantId) -> Result<usize, HubError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SessionMessage::Leave {
                participant_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))?
    }

    /// Relay an opaque payload to one member (fire-and-forget).
    pub async fn relay(
        &self,
        sender_id: ParticipantId,
        recipient_id: ParticipantId,
        payload: String,
    ) -> Result<(), HubError> {
        self.sender
            .send(SessionMessage::Relay {
                sender_id,
                recipient_id,
                payload,
            })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))
    }

    /// Broadcast chat text to every other member (fire-and-forget).
    pub async fn chat(&self, sender_id: ParticipantId, text: String) -> Result<(), HubError> {
        self.sender
            .send(SessionMessage::Chat { sender_id, text })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))
    }

    pub async fn get_state(&self) -> Result<SessionState, HubError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SessionMessage::GetState { respond_to: tx })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))?
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// A member's writer queue plus the name chat messages are attributed to.
struct Attendee {
    display_name: String,
    outbound: Outbound,
}

/// The `SessionActor` implementation.
pub struct SessionActor {
    session_key: SessionKey,
    receiver: mpsc::Receiver<SessionMessage>,
    cancel_token: CancellationToken,
    store: Arc<dyn SessionStore>,
    attendees: HashMap<ParticipantId, Attendee>,
    max_participants: usize,
    metrics: Arc<HubMetrics>,
    mailbox: MailboxMonitor,
}

impl SessionActor {
    /// Spawn a new session actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        session_key: SessionKey,
        cancel_token: CancellationToken,
        store: Arc<dyn SessionStore>,
        max_participants: usize,
        metrics: Arc<HubMetrics>,
    ) -> (SessionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);

        let actor = Self {
            session_key: session_key.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            store,
            attendees: HashMap::new(),
            max_participants,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Session, session_key.as_str()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = SessionActorHandle {
            sender,
            cancel_token,
            session_key,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "hub.actor.session", fields(session_key = %self.session_key))]
    async fn run(mut self) {
        debug!(
            target: "hub.actor.session",
            session_key = %self.session_key,
            "SessionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "hub.actor.session",
                        session_key = %self.session_key,
                        "SessionActor received cancellation signal"
                    );
                    self.shutdown();
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.observe(self.receiver.len());
                            self.handle_message(message).await;
                        }
                        None => {
                            debug!(
                                target: "hub.actor.session",
                                session_key = %self.session_key,
                                "SessionActor channel closed, exiting"
                            );
                            self.shutdown();
                            break;
                        }
                    }
                }
            }
        }

        debug!(
            target: "hub.actor.session",
            session_key = %self.session_key,
            messages_processed = self.mailbox.processed(),
            "SessionActor stopped"
        );
    }

    async fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Join {
                participant_id,
                display_name,
                outbound,
                respond_to,
            } => {
                let result = self.handle_join(participant_id, display_name, outbound).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::Leave {
                participant_id,
                respond_to,
            } => {
                let result = self.handle_leave(participant_id).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::Relay {
                sender_id,
                recipient_id,
                payload,
            } => self.handle_relay(sender_id, recipient_id, payload),

            SessionMessage::Chat { sender_id, text } => self.handle_chat(sender_id, text),

            SessionMessage::GetState { respond_to } => {
                let result = self.store.members(&self.session_key).await.map(|members| {
                    SessionState {
                        session_key: self.session_key.clone(),
                        members,
                    }
                });
                let _ = respond_to.send(result);
            }
        }
    }

    async fn handle_join(
        &mut self,
        participant_id: ParticipantId,
        display_name: String,
        outbound: Outbound,
    ) -> Result<JoinResult, HubError> {
        if self.attendees.contains_key(&participant_id) {
            // Same connection joining again: answer, never broadcast.
            prom::record_join("rejoin");
            let members = self.store.members(&self.session_key).await?;
            self.deliver(
                participant_id,
                &outbound,
                ServerMessage::Joined {
                    participant_id,
                    members: members.clone(),
                },
            );
            return Ok(JoinResult {
                members,
                newly_joined: false,
            });
        }

        if self.attendees.len() >= self.max_participants {
            prom::record_join("capacity");
            warn!(
                target: "hub.actor.session",
                session_key = %self.session_key,
                max_participants = self.max_participants,
                "Session at capacity, rejecting join"
            );
            return Err(HubError::SessionCapacityExceeded(format!(
                "max {} participants",
                self.max_participants
            )));
        }

        let member = Member {
            participant_id,
            display_name: display_name.clone(),
        };
        let added = self.store.add_member(&self.session_key, member).await?;
        if !added {
            warn!(
                target: "hub.actor.session",
                session_key = %self.session_key,
                participant_id = %participant_id,
                "Store already listed participant missing from attendees"
            );
        }
        let joiner = outbound.clone();
        self.attendees.insert(
            participant_id,
            Attendee {
                display_name,
                outbound,
            },
        );
        self.metrics.participant_joined();
        prom::record_join("ok");

        let members = self.store.members(&self.session_key).await?;

        info!(
            target: "hub.actor.session",
            session_key = %self.session_key,
            participant_id = %participant_id,
            member_count = members.len(),
            "Participant joined"
        );

        // The joiner's snapshot is queued before anything else can reach it.
        self.deliver(
            participant_id,
            &joiner,
            ServerMessage::Joined {
                participant_id,
                members: members.clone(),
            },
        );

        self.broadcast(
            Some(participant_id),
            &ServerMessage::ParticipantJoined {
                participant_id,
                members: members.clone(),
            },
        );

        Ok(JoinResult {
            members,
            newly_joined: true,
        })
    }

    async fn handle_leave(&mut self, participant_id: ParticipantId) -> Result<usize, HubError> {
        if self.attendees.remove(&participant_id).is_none() {
            return Ok(self.attendees.len());
        }
        self.metrics.participant_left();

        // The in-actor view is authoritative for delivery even if the store fails.
        let store_result = self
            .store
            .remove_member(&self.session_key, participant_id)
            .await;

        info!(
            target: "hub.actor.session",
            session_key = %self.session_key,
            participant_id = %participant_id,
            remaining = self.attendees.len(),
            "Participant left"
        );

        self.broadcast(None, &ServerMessage::ParticipantLeft { participant_id });

        store_result?;
        Ok(self.attendees.len())
    }

    fn handle_relay(
        &self,
        sender_id: ParticipantId,
        recipient_id: ParticipantId,
        payload: String,
    ) {
        if !self.attendees.contains_key(&sender_id) {
            prom::record_message_dropped("not_member");
            return;
        }

        let Some(recipient) = self.attendees.get(&recipient_id) else {
            debug!(
                target: "hub.actor.session",
                session_key = %self.session_key,
                sender_id = %sender_id,
                recipient_id = %recipient_id,
                "Recipient not in session, dropping signal"
            );
            prom::record_message_dropped("stale_recipient");
            return;
        };

        self.deliver(
            recipient_id,
            &recipient.outbound,
            ServerMessage::Signal { sender_id, payload },
        );
    }

    fn handle_chat(&self, sender_id: ParticipantId, text: String) {
        let Some(sender) = self.attendees.get(&sender_id) else {
            prom::record_message_dropped("not_member");
            return;
        };

        debug!(
            target: "hub.actor.session",
            session_key = %self.session_key,
            sender_id = %sender_id,
            text_len = text.len(),
            "Broadcasting chat"
        );

        self.broadcast(
            Some(sender_id),
            &ServerMessage::Chat {
                text,
                sender_name: sender.display_name.clone(),
                sender_id,
            },
        );
    }

    /// Deliver to every member except `except`.
    fn broadcast(&self, except: Option<ParticipantId>, message: &ServerMessage) {
        for (id, attendee) in &self.attendees {
            if Some(*id) != except {
                self.deliver(*id, &attendee.outbound, message.clone());
            }
        }
    }

    /// Push one frame onto a member's writer queue without waiting.
    fn deliver(&self, recipient_id: ParticipantId, outbound: &Outbound, message: ServerMessage) {
        let kind = message.kind();
        match outbound.try_send(message) {
            Ok(()) => prom::record_message_relayed(kind),
            Err(TrySendError::Full(_)) => {
                self.mailbox.record_drop();
                prom::record_message_dropped("writer_full");
                warn!(
                    target: "hub.actor.session",
                    session_key = %self.session_key,
                    recipient_id = %recipient_id,
                    kind,
                    "Writer queue full, dropping frame"
                );
            }
            Err(TrySendError::Closed(_)) => {
                prom::record_message_dropped("writer_closed");
            }
        }
    }

    fn shutdown(&mut self) {
        // Store rows belong to the hub, which clears them when it releases the key.
        for _ in self.attendees.drain() {
            self.metrics.participant_left();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::store::mock::FailingSessionStore;
    use crate::store::InMemorySessionStore;
    use std::time::Duration;

    struct TestMember {
        id: ParticipantId,
        outbound: Outbound,
        inbox: mpsc::Receiver<ServerMessage>,
    }

    fn test_member() -> TestMember {
        let (outbound, inbox) = mpsc::channel(16);
        TestMember {
            id: ParticipantId::new(),
            outbound,
            inbox,
        }
    }

    fn spawn_session(max: usize) -> (SessionActorHandle, JoinHandle<()>, Arc<HubMetrics>) {
        let metrics = HubMetrics::new();
        let (handle, task) = SessionActor::spawn(
            SessionKey::new("/room1"),
            CancellationToken::new(),
            Arc::new(InMemorySessionStore::new()),
            max,
            Arc::clone(&metrics),
        );
        (handle, task, metrics)
    }

    async fn recv(m: &mut TestMember) -> ServerMessage {
        tokio::time::timeout(Duration::from_secs(1), m.inbox.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("writer queue closed")
    }

    /// Join and consume the `joined` frame the session queues for the joiner.
    async fn join(handle: &SessionActorHandle, m: &mut TestMember, name: &str) -> JoinResult {
        let result = handle
            .join(m.id, name.to_string(), m.outbound.clone())
            .await
            .unwrap();
        match recv(m).await {
            ServerMessage::Joined {
                participant_id,
                members,
            } => {
                assert_eq!(participant_id, m.id);
                assert_eq!(members, result.members);
            }
            other => panic!("expected joined first, got {other:?}"),
        }
        result
    }

    fn ids(members: &[Member]) -> Vec<ParticipantId> {
        members.iter().map(|m| m.participant_id).collect()
    }

    #[tokio::test]
    async fn test_join_returns_members_in_join_order() {
        let (handle, _task, metrics) = spawn_session(10);
        let mut a = test_member();
        let mut b = test_member();

        let first = join(&handle, &mut a, "alice").await;
        assert_eq!(ids(&first.members), vec![a.id]);
        assert!(first.newly_joined);
        assert!(a.inbox.try_recv().is_err(), "first joiner gets no broadcast");

        let second = join(&handle, &mut b, "bob").await;
        assert_eq!(ids(&second.members), vec![a.id, b.id]);

        match recv(&mut a).await {
            ServerMessage::ParticipantJoined {
                participant_id,
                members,
            } => {
                assert_eq!(participant_id, b.id);
                assert_eq!(ids(&members), vec![a.id, b.id]);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        assert_eq!(metrics.participant_count(), 2);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_rejoin_is_idempotent_without_broadcast() {
        let (handle, _task, _metrics) = spawn_session(10);
        let mut a = test_member();
        let mut b = test_member();

        join(&handle, &mut a, "alice").await;
        join(&handle, &mut b, "bob").await;
        let _ = recv(&mut a).await;

        let again = join(&handle, &mut b, "bob").await;
        assert!(!again.newly_joined);
        assert_eq!(ids(&again.members), vec![a.id, b.id]);

        let state = handle.get_state().await.unwrap();
        assert_eq!(state.members.len(), 2);
        assert!(a.inbox.try_recv().is_err(), "rejoin must not broadcast");

        handle.cancel();
    }

    #[tokio::test]
    async fn test_joined_reaches_joiner_before_any_broadcast() {
        let (handle, _task, _metrics) = spawn_session(10);
        let mut a = test_member();
        let mut b = test_member();
        let mut c = test_member();

        // Join b and c without reading their queues in between.
        join(&handle, &mut a, "alice").await;
        handle
            .join(b.id, "bob".to_string(), b.outbound.clone())
            .await
            .unwrap();
        handle
            .join(c.id, "carol".to_string(), c.outbound.clone())
            .await
            .unwrap();
        handle.relay(c.id, b.id, "offer".to_string()).await.unwrap();
        handle.get_state().await.unwrap();

        match recv(&mut b).await {
            ServerMessage::Joined { members, .. } => {
                assert_eq!(ids(&members), vec![a.id, b.id]);
            }
            other => panic!("expected joined first, got {other:?}"),
        }
        assert!(matches!(
            recv(&mut b).await,
            ServerMessage::ParticipantJoined { participant_id, .. } if participant_id == c.id
        ));
        assert!(matches!(
            recv(&mut b).await,
            ServerMessage::Signal { sender_id, .. } if sender_id == c.id
        ));

        match recv(&mut c).await {
            ServerMessage::Joined { members, .. } => {
                assert_eq!(ids(&members), vec![a.id, b.id, c.id]);
            }
            other => panic!("expected joined first, got {other:?}"),
        }
        assert!(c.inbox.try_recv().is_err());

        handle.cancel();
    }

    #[tokio::test]
    async fn test_cancel_leaves_store_to_the_hub() {
        let store = Arc::new(InMemorySessionStore::new());
        let key = SessionKey::new("/room1");
        let (handle, task) = SessionActor::spawn(
            key.clone(),
            CancellationToken::new(),
            Arc::clone(&store) as Arc<dyn SessionStore>,
            10,
            HubMetrics::new(),
        );
        let mut a = test_member();
        join(&handle, &mut a, "alice").await;

        // Rows written under the same key after cancellation must survive
        // the old actor's shutdown.
        handle.cancel();
        let newcomer = Member {
            participant_id: ParticipantId::new(),
            display_name: "bob".to_string(),
        };
        store.remove_session(&key).await.unwrap();
        store.add_member(&key, newcomer.clone()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("actor should stop")
            .expect("actor should not panic");

        assert_eq!(store.members(&key).await.unwrap(), vec![newcomer]);
    }

    #[tokio::test]
    async fn test_capacity_enforced() {
        let (handle, _task, _metrics) = spawn_session(1);
        let mut a = test_member();
        let b = test_member();

        join(&handle, &mut a, "alice").await;
        let result = handle.join(b.id, "bob".to_string(), b.outbound.clone()).await;
        assert!(matches!(result, Err(HubError::SessionCapacityExceeded(_))));

        handle.cancel();
    }

    #[tokio::test]
    async fn test_relay_delivers_exactly_once() {
        let (handle, _task, _metrics) = spawn_session(10);
        let mut a = test_member();
        let mut b = test_member();

        join(&handle, &mut a, "alice").await;
        join(&handle, &mut b, "bob").await;

        handle
            .relay(a.id, b.id, r#"{"sdp":{}}"#.to_string())
            .await
            .unwrap();

        match recv(&mut b).await {
            ServerMessage::Signal { sender_id, payload } => {
                assert_eq!(sender_id, a.id);
                assert_eq!(payload, r#"{"sdp":{}}"#);
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        // Round-trip through the mailbox so any stray delivery would be visible.
        handle.get_state().await.unwrap();
        assert!(b.inbox.try_recv().is_err());

        handle.cancel();
    }

    #[tokio::test]
    async fn test_relay_to_departed_recipient_is_dropped() {
        let (handle, _task, _metrics) = spawn_session(10);
        let mut a = test_member();
        let mut b = test_member();

        join(&handle, &mut a, "alice").await;
        join(&handle, &mut b, "bob").await;
        let _ = recv(&mut a).await;

        assert_eq!(handle.leave(b.id).await.unwrap(), 1);
        let _ = recv(&mut a).await;

        handle
            .relay(a.id, b.id, "late".to_string())
            .await
            .unwrap();
        handle.get_state().await.unwrap();

        assert!(b.inbox.try_recv().is_err());
        assert!(a.inbox.try_recv().is_err());

        handle.cancel();
    }

    #[tokio::test]
    async fn test_relay_from_non_member_is_dropped() {
        let (handle, _task, _metrics) = spawn_session(10);
        let mut a = test_member();

        join(&handle, &mut a, "alice").await;
        handle
            .relay(ParticipantId::new(), a.id, "spoofed".to_string())
            .await
            .unwrap();
        handle.get_state().await.unwrap();

        assert!(a.inbox.try_recv().is_err());

        handle.cancel();
    }

    #[tokio::test]
    async fn test_leave_notifies_every_remaining_member_once() {
        let (handle, _task, metrics) = spawn_session(10);
        let mut members: Vec<TestMember> = (0..4).map(|_| test_member()).collect();

        for (i, m) in members.iter_mut().enumerate() {
            join(&handle, m, &format!("p{i}")).await;
        }
        // Drain join broadcasts.
        for m in &mut members {
            while m.inbox.try_recv().is_ok() {}
        }

        let leaver = members.remove(0);
        assert_eq!(handle.leave(leaver.id).await.unwrap(), 3);

        for m in &mut members {
            match recv(m).await {
                ServerMessage::ParticipantLeft { participant_id } => {
                    assert_eq!(participant_id, leaver.id);
                }
                other => panic!("unexpected frame: {other:?}"),
            }
            assert!(m.inbox.try_recv().is_err());
        }

        let mut leaver = leaver;
        assert!(leaver.inbox.try_recv().is_err(), "leaver is not notified");
        assert_eq!(metrics.participant_count(), 3);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_chat_goes_to_others_with_sender_name() {
        let (handle, _task, _metrics) = spawn_session(10);
        let mut a = test_member();
        let mut b = test_member();

        join(&handle, &mut a, "alice").await;
        join(&handle, &mut b, "bob").await;
        let _ = recv(&mut a).await;

        handle.chat(a.id, "hello".to_string()).await.unwrap();

        match recv(&mut b).await {
            ServerMessage::Chat {
                text,
                sender_name,
                sender_id,
            } => {
                assert_eq!(text, "hello");
                assert_eq!(sender_name, "alice");
                assert_eq!(sender_id, a.id);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        handle.get_state().await.unwrap();
        assert!(a.inbox.try_recv().is_err(), "no echo to sender");

        handle.cancel();
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_on_join() {
        let (handle, _task) = SessionActor::spawn(
            SessionKey::new("/room1"),
            CancellationToken::new(),
            Arc::new(FailingSessionStore::new()),
            10,
            HubMetrics::new(),
        );
        let a = test_member();

        let result = handle.join(a.id, "alice".to_string(), a.outbound.clone()).await;
        assert!(matches!(result, Err(HubError::Store(_))));

        handle.cancel();
    }

    #[tokio::test]
    async fn test_cancel_releases_members() {
        let (handle, task, metrics) = spawn_session(10);
        let mut a = test_member();
        join(&handle, &mut a, "alice").await;

        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("actor should stop")
            .expect("actor should not panic");

        assert!(handle.is_cancelled());
        assert_eq!(metrics.participant_count(), 0);
    }
}
