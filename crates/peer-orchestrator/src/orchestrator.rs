//! Peer session orchestrator actor.
//!
//! One actor per local participant. It consumes hub events, engine events
//! and user intents, owns every [`PeerLink`] keyed by remote id, and
//! republishes the [`MembershipView`] after each step.
//!
//! Glare policy: the member that receives `participant-joined` for a
//! newcomer offers; the newcomer only answers.

use crate::client::{ConnectivityStatus, HubChannel, HubClient, HubEvent};
use crate::config::OrchestratorConfig;
use crate::engine::{ConnectionId, MediaEngine, PeerEvent};
use crate::errors::{OrchestratorError, TransportError};
use crate::history::SessionHistory;
use crate::link::{CloseReason, LinkState, PeerLink, Transition};
use crate::media::{LocalMedia, LocalTrack, MediaKind, MediaProbe};
use crate::signal::SignalPayload;
use crate::view::{project, ChatLog, LocalPreview, MembershipView, Roster, ViewSource};
use common::protocol::{ClientMessage, Member, ServerMessage};
use common::types::ParticipantId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Intent mailbox depth.
const INTENT_CHANNEL_BUFFER: usize = 64;

/// Engine event queue depth.
const PEER_EVENT_BUFFER: usize = 256;

/// Hub frames held while our own `joined` is outstanding.
const HELD_BEFORE_JOIN_LIMIT: usize = 64;

/// User intents from the presentation layer.
#[derive(Debug)]
enum Intent {
    ToggleVideo {
        respond_to: oneshot::Sender<Result<bool, OrchestratorError>>,
    },
    ToggleAudio {
        respond_to: oneshot::Sender<Result<bool, OrchestratorError>>,
    },
    ToggleScreenShare {
        respond_to: oneshot::Sender<Result<bool, OrchestratorError>>,
    },
    StopScreenShare {
        respond_to: oneshot::Sender<Result<(), OrchestratorError>>,
    },
    /// The host ended the display capture on its own.
    ScreenTrackEnded,
    SendChat {
        text: String,
        respond_to: oneshot::Sender<Result<(), OrchestratorError>>,
    },
    MarkChatRead,
    Leave {
        respond_to: oneshot::Sender<Result<(), OrchestratorError>>,
    },
}

/// Handle to a running orchestrator.
#[derive(Clone)]
pub struct OrchestratorHandle {
    sender: mpsc::Sender<Intent>,
    view: watch::Receiver<MembershipView>,
    cancel_token: CancellationToken,
}

impl OrchestratorHandle {
    /// Toggle camera mute. Returns whether video is now enabled.
    pub async fn toggle_video(&self) -> Result<bool, OrchestratorError> {
        self.request(|respond_to| Intent::ToggleVideo { respond_to })
            .await
    }

    /// Toggle microphone mute. Returns whether audio is now enabled.
    pub async fn toggle_audio(&self) -> Result<bool, OrchestratorError> {
        self.request(|respond_to| Intent::ToggleAudio { respond_to })
            .await
    }

    /// Start or stop screen sharing. Returns whether sharing is now active.
    pub async fn toggle_screen_share(&self) -> Result<bool, OrchestratorError> {
        self.request(|respond_to| Intent::ToggleScreenShare { respond_to })
            .await
    }

    /// Stop screen sharing and restore the camera. No-op when not sharing.
    pub async fn stop_screen_share(&self) -> Result<(), OrchestratorError> {
        self.request(|respond_to| Intent::StopScreenShare { respond_to })
            .await
    }

    /// Report that the host ended the display capture.
    pub async fn screen_track_ended(&self) -> Result<(), OrchestratorError> {
        self.sender
            .send(Intent::ScreenTrackEnded)
            .await
            .map_err(|e| OrchestratorError::Internal(format!("channel send failed: {e}")))
    }

    /// Send a chat message to the rest of the session.
    pub async fn send_chat(&self, text: impl Into<String>) -> Result<(), OrchestratorError> {
        let text = text.into();
        self.request(|respond_to| Intent::SendChat { text, respond_to })
            .await
    }

    /// Reset the unread chat counter.
    pub async fn mark_chat_read(&self) -> Result<(), OrchestratorError> {
        self.sender
            .send(Intent::MarkChatRead)
            .await
            .map_err(|e| OrchestratorError::Internal(format!("channel send failed: {e}")))
    }

    /// Leave the session: close every link and release capture. The
    /// orchestrator stops once this returns.
    pub async fn leave(&self) -> Result<(), OrchestratorError> {
        self.request(|respond_to| Intent::Leave { respond_to })
            .await
    }

    /// Subscribe to view updates.
    #[must_use]
    pub fn view(&self) -> watch::Receiver<MembershipView> {
        self.view.clone()
    }

    /// Latest view.
    #[must_use]
    pub fn current_view(&self) -> MembershipView {
        self.view.borrow().clone()
    }

    /// Cancel the orchestrator without sending `leave`.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, OrchestratorError>>) -> Intent,
    ) -> Result<T, OrchestratorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| OrchestratorError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| OrchestratorError::Internal(format!("response receive failed: {e}")))?
    }
}

/// The orchestrator actor.
pub struct PeerOrchestrator {
    config: OrchestratorConfig,
    engine: Arc<dyn MediaEngine>,
    probe: MediaProbe,
    history: Arc<dyn SessionHistory>,
    hub_tx: mpsc::Sender<ClientMessage>,
    hub_rx: mpsc::Receiver<HubEvent>,
    hub_open: bool,
    intents: mpsc::Receiver<Intent>,
    peer_tx: mpsc::Sender<PeerEvent>,
    peer_rx: mpsc::Receiver<PeerEvent>,
    links: HashMap<ParticipantId, PeerLink>,
    /// Generation handed to the next engine connection.
    next_generation: u64,
    media: LocalMedia,
    roster: Roster,
    chat: ChatLog,
    local_id: Option<ParticipantId>,
    /// Session frames that overtook our `joined`, replayed once it lands.
    held: Vec<ServerMessage>,
    connectivity: ConnectivityStatus,
    view_tx: watch::Sender<MembershipView>,
    cancel_token: CancellationToken,
}

impl PeerOrchestrator {
    /// Connect to the hub named in `config` and start orchestrating.
    ///
    /// The hub client runs on a child of `cancel_token` and stops when the
    /// orchestrator does.
    #[must_use]
    pub fn connect(
        config: OrchestratorConfig,
        engine: Arc<dyn MediaEngine>,
        probe: MediaProbe,
        history: Arc<dyn SessionHistory>,
        cancel_token: CancellationToken,
    ) -> (OrchestratorHandle, JoinHandle<()>) {
        let (hub, _client_task) = HubClient::spawn(
            config.hub_url.clone(),
            config.reconnect,
            cancel_token.child_token(),
        );
        Self::spawn(config, engine, probe, history, hub, cancel_token)
    }

    /// Start orchestrating over an existing hub channel.
    #[must_use]
    pub fn spawn(
        config: OrchestratorConfig,
        engine: Arc<dyn MediaEngine>,
        probe: MediaProbe,
        history: Arc<dyn SessionHistory>,
        hub: HubChannel,
        cancel_token: CancellationToken,
    ) -> (OrchestratorHandle, JoinHandle<()>) {
        let (sender, intents) = mpsc::channel(INTENT_CHANNEL_BUFFER);
        let (peer_tx, peer_rx) = mpsc::channel(PEER_EVENT_BUFFER);
        let (view_tx, view_rx) = watch::channel(MembershipView {
            local: LocalPreview {
                display_name: config.display_name.clone(),
                ..Default::default()
            },
            ..Default::default()
        });

        let actor = Self {
            config,
            engine,
            probe,
            history,
            hub_tx: hub.outbound,
            hub_rx: hub.events,
            hub_open: true,
            intents,
            peer_tx,
            peer_rx,
            links: HashMap::new(),
            next_generation: 0,
            media: LocalMedia::default(),
            roster: Roster::default(),
            chat: ChatLog::default(),
            local_id: None,
            held: Vec::new(),
            connectivity: ConnectivityStatus::Connecting,
            view_tx,
            cancel_token: cancel_token.clone(),
        };

        let task = tokio::spawn(actor.run());

        (
            OrchestratorHandle {
                sender,
                view: view_rx,
                cancel_token,
            },
            task,
        )
    }

    #[instrument(skip_all, name = "peer.orchestrator", fields(session_key = %self.config.session_key))]
    async fn run(mut self) {
        self.media = self
            .probe
            .acquire(self.config.want_video, self.config.want_audio)
            .await;
        self.publish();

        loop {
            let deadline = self.next_negotiation_deadline();
            let stalled = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(target: "peer.orchestrator", "Orchestrator received cancellation signal");
                    self.teardown(false).await;
                    break;
                }

                intent = self.intents.recv() => {
                    match intent {
                        Some(intent) => {
                            if self.handle_intent(intent).await {
                                break;
                            }
                        }
                        None => {
                            self.teardown(true).await;
                            break;
                        }
                    }
                }

                event = self.hub_rx.recv(), if self.hub_open => {
                    match event {
                        Some(event) => self.handle_hub_event(event).await,
                        None => {
                            self.hub_open = false;
                            self.on_transport_lost(ConnectivityStatus::Disconnected).await;
                        }
                    }
                }

                Some(event) = self.peer_rx.recv() => {
                    self.handle_peer_event(event).await;
                }

                () = stalled => {
                    self.expire_stalled_links().await;
                }
            }

            self.publish();
        }

        info!(target: "peer.orchestrator", "Orchestrator stopped");
    }

    /// Handle one intent. Returns true when the actor should exit.
    async fn handle_intent(&mut self, intent: Intent) -> bool {
        match intent {
            Intent::ToggleVideo { respond_to } => {
                let result = self.toggle(MediaKind::Video);
                let _ = respond_to.send(Ok(result));
            }
            Intent::ToggleAudio { respond_to } => {
                let result = self.toggle(MediaKind::Audio);
                let _ = respond_to.send(Ok(result));
            }
            Intent::ToggleScreenShare { respond_to } => {
                let result = if self.media.is_screen_sharing() {
                    self.stop_screen_share().await;
                    Ok(false)
                } else {
                    self.start_screen_share().await.map(|()| true)
                };
                let _ = respond_to.send(result);
            }
            Intent::StopScreenShare { respond_to } => {
                self.stop_screen_share().await;
                let _ = respond_to.send(Ok(()));
            }
            Intent::ScreenTrackEnded => {
                debug!(target: "peer.orchestrator", "Display capture ended by host");
                self.stop_screen_share().await;
            }
            Intent::SendChat { text, respond_to } => {
                let _ = respond_to.send(self.send_chat(text));
            }
            Intent::MarkChatRead => self.chat.mark_read(),
            Intent::Leave { respond_to } => {
                self.teardown(true).await;
                let _ = respond_to.send(Ok(()));
                return true;
            }
        }
        false
    }

    fn toggle(&mut self, kind: MediaKind) -> bool {
        let enabled = match kind {
            MediaKind::Video => !self.media.video_enabled,
            MediaKind::Audio => !self.media.audio_enabled,
        };
        if self.probe.set_enabled(&mut self.media, kind, enabled) {
            enabled
        } else {
            false
        }
    }

    async fn start_screen_share(&mut self) -> Result<(), OrchestratorError> {
        let screen = self.probe.acquire_display().await?;
        info!(target: "peer.orchestrator", track_id = %screen.id, "Screen share started");
        self.media.screen = Some(screen.clone());
        self.retarget_video(Some(&screen)).await;
        Ok(())
    }

    async fn stop_screen_share(&mut self) {
        let Some(screen) = self.media.screen.take() else {
            return;
        };
        self.probe.release(&screen);
        let camera = self.media.camera.clone();
        info!(
            target: "peer.orchestrator",
            restored_camera = camera.is_some(),
            "Screen share stopped"
        );
        self.retarget_video(camera.as_ref()).await;
    }

    /// Point every link's outgoing video at `track` within one step.
    async fn retarget_video(&mut self, track: Option<&LocalTrack>) {
        let mut failed = Vec::new();
        let mut offers = Vec::new();
        for (remote_id, link) in &mut self.links {
            match link.set_outgoing_video(track).await {
                Ok(Some(offer)) => offers.push((*remote_id, offer)),
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        target: "peer.orchestrator",
                        remote_id = %remote_id,
                        error = %e,
                        "Video retarget failed"
                    );
                    failed.push(*remote_id);
                }
            }
        }
        for (remote_id, offer) in offers {
            self.send_signal(remote_id, &offer);
        }
        for remote_id in failed {
            self.close_link(remote_id, CloseReason::NegotiationFailed).await;
        }
    }

    fn send_chat(&mut self, text: String) -> Result<(), OrchestratorError> {
        let Some(local_id) = self.local_id else {
            return Err(OrchestratorError::NotJoined);
        };
        self.hub_tx
            .try_send(ClientMessage::Chat { text: text.clone() })
            .map_err(|e| TransportError::Send(e.to_string()))?;
        // The hub never echoes chat to its sender
        self.chat
            .push_local(local_id, self.config.display_name.clone(), text);
        Ok(())
    }

    async fn handle_hub_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::Status(status) => {
                debug!(target: "peer.orchestrator", status = ?status, "Hub connectivity changed");
                match status {
                    ConnectivityStatus::Connected => {
                        self.connectivity = status;
                        self.send_to_hub(ClientMessage::Join {
                            session_key: self.config.session_key.clone(),
                            display_name: self.config.display_name.clone(),
                        });
                    }
                    ConnectivityStatus::Connecting
                    | ConnectivityStatus::Reconnecting { .. }
                    | ConnectivityStatus::Disconnected => self.on_transport_lost(status).await,
                }
            }
            HubEvent::Message(message) => {
                if self.local_id.is_none() && needs_local_id(&message) {
                    self.hold_until_joined(message);
                    return;
                }
                let joined = matches!(message, ServerMessage::Joined { .. });
                self.handle_server_message(message).await;
                if joined {
                    for message in std::mem::take(&mut self.held) {
                        self.handle_server_message(message).await;
                    }
                }
            }
        }
    }

    fn hold_until_joined(&mut self, message: ServerMessage) {
        if self.held.len() >= HELD_BEFORE_JOIN_LIMIT {
            warn!(
                target: "peer.orchestrator",
                kind = message.kind(),
                "Too many frames before join, dropping"
            );
            return;
        }
        debug!(target: "peer.orchestrator", kind = message.kind(), "Holding frame until joined");
        self.held.push(message);
    }

    async fn handle_server_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Joined {
                participant_id,
                members,
            } => self.on_joined(participant_id, &members),

            ServerMessage::ParticipantJoined {
                participant_id,
                members,
            } => self.on_participant_joined(participant_id, &members).await,

            ServerMessage::ParticipantLeft { participant_id } => {
                self.roster.remove(participant_id);
                self.close_link(participant_id, CloseReason::PeerLeft).await;
            }

            ServerMessage::Signal { sender_id, payload } => {
                self.on_signal(sender_id, &payload).await;
            }

            ServerMessage::Chat {
                text,
                sender_name,
                sender_id,
            } => {
                debug!(
                    target: "peer.orchestrator",
                    sender_id = %sender_id,
                    text_len = text.len(),
                    "Chat received"
                );
                self.chat.push_remote(sender_id, sender_name, text);
            }

            ServerMessage::Error { code, message } => {
                warn!(target: "peer.orchestrator", code, message = %message, "Hub rejected request");
            }
        }
    }

    fn on_joined(&mut self, participant_id: ParticipantId, members: &[Member]) {
        info!(
            target: "peer.orchestrator",
            participant_id = %participant_id,
            member_count = members.len(),
            "Joined session"
        );
        self.local_id = Some(participant_id);
        self.roster.update(members);

        let history = Arc::clone(&self.history);
        let session_key = self.config.session_key.clone();
        tokio::spawn(async move {
            if let Err(e) = history.record_join(&session_key).await {
                warn!(target: "peer.orchestrator", error = %e, "Failed to record join");
            }
        });
    }

    async fn on_participant_joined(&mut self, participant_id: ParticipantId, members: &[Member]) {
        self.roster.update(members);

        let Some(local_id) = self.local_id else {
            return;
        };
        if participant_id == local_id || self.links.contains_key(&participant_id) {
            return;
        }

        let id = self.next_connection_id(participant_id);
        match PeerLink::open_offerer(
            self.engine.as_ref(),
            id,
            self.peer_tx.clone(),
            &self.media,
        )
        .await
        {
            Ok((link, offer)) => {
                info!(
                    target: "peer.orchestrator",
                    remote_id = %participant_id,
                    role = link.role().as_str(),
                    "Peer link opened"
                );
                self.links.insert(participant_id, link);
                self.send_signal(participant_id, &offer);
            }
            Err(e) => {
                warn!(
                    target: "peer.orchestrator",
                    remote_id = %participant_id,
                    error = %e,
                    "Failed to open peer link"
                );
            }
        }
    }

    async fn on_signal(&mut self, sender_id: ParticipantId, payload: &str) {
        if self.local_id.is_none() {
            debug!(target: "peer.orchestrator", sender_id = %sender_id, "Signal before join dropped");
            return;
        }

        let payload = match SignalPayload::decode(payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    target: "peer.orchestrator",
                    sender_id = %sender_id,
                    payload_len = payload.len(),
                    error = %e,
                    "Undecodable signal payload dropped"
                );
                return;
            }
        };

        if !self.links.contains_key(&sender_id) {
            let id = self.next_connection_id(sender_id);
            match PeerLink::open_answerer(self.engine.as_ref(), id, self.peer_tx.clone()).await {
                Ok(link) => {
                    info!(
                        target: "peer.orchestrator",
                        remote_id = %sender_id,
                        role = link.role().as_str(),
                        "Peer link opened"
                    );
                    self.links.insert(sender_id, link);
                }
                Err(e) => {
                    warn!(
                        target: "peer.orchestrator",
                        remote_id = %sender_id,
                        error = %e,
                        "Failed to open peer link"
                    );
                    return;
                }
            }
        }

        let kind = payload.kind();
        let result = match self.links.get_mut(&sender_id) {
            Some(link) => link.apply_signal(payload, &self.media).await,
            None => return,
        };

        match result {
            Ok(Some(reply)) => self.send_signal(sender_id, &reply),
            Ok(None) => {}
            Err(e) => {
                warn!(
                    target: "peer.orchestrator",
                    remote_id = %sender_id,
                    kind,
                    error = %e,
                    "Negotiation failed"
                );
                self.close_link(sender_id, CloseReason::NegotiationFailed)
                    .await;
            }
        }
    }

    async fn handle_peer_event(&mut self, event: PeerEvent) {
        let remote_id = event.remote_id();
        let Some(link) = self.links.get_mut(&remote_id) else {
            debug!(target: "peer.orchestrator", remote_id = %remote_id, "Event for unknown link ignored");
            return;
        };
        // Closed connections keep reporting; only the current one may drive the link.
        if link.connection_id() != event.connection() {
            debug!(
                target: "peer.orchestrator",
                connection = %event.connection(),
                current = %link.connection_id(),
                "Event from replaced connection ignored"
            );
            return;
        }

        match event {
            PeerEvent::IceCandidate { candidate, .. } => {
                self.send_signal(remote_id, &SignalPayload::Ice(candidate));
            }

            PeerEvent::StateChanged { state, .. } => {
                debug!(
                    target: "peer.link",
                    remote_id = %remote_id,
                    state = state.as_str(),
                    "Engine state"
                );
                match link.on_connection_state(state) {
                    Transition::Connected => {
                        info!(target: "peer.link", remote_id = %remote_id, "Peer link connected");
                        match link.take_pending_renegotiation().await {
                            Ok(Some(offer)) => self.send_signal(remote_id, &offer),
                            Ok(None) => {}
                            Err(e) => {
                                warn!(target: "peer.link", remote_id = %remote_id, error = %e, "Renegotiation failed");
                                self.close_link(remote_id, CloseReason::NegotiationFailed)
                                    .await;
                            }
                        }
                    }
                    Transition::Closed => {
                        self.close_link(remote_id, CloseReason::ConnectionLost).await;
                    }
                    Transition::Unchanged => {}
                }
            }

            PeerEvent::RemoteTrack { track, .. } => {
                debug!(
                    target: "peer.link",
                    remote_id = %remote_id,
                    kind = track.kind.as_str(),
                    "Remote track added"
                );
                link.add_remote_track(track);
            }
        }
    }

    fn next_connection_id(&mut self, remote_id: ParticipantId) -> ConnectionId {
        self.next_generation += 1;
        ConnectionId::new(remote_id, self.next_generation)
    }

    fn next_negotiation_deadline(&self) -> Option<Instant> {
        let timeout = self.config.negotiation_deadline()?;
        self.links
            .values()
            .filter(|link| link.state() == LinkState::Negotiating)
            .map(|link| link.opened_at() + timeout)
            .min()
    }

    async fn expire_stalled_links(&mut self) {
        let Some(timeout) = self.config.negotiation_deadline() else {
            return;
        };
        let now = Instant::now();
        let stalled: Vec<ParticipantId> = self
            .links
            .values()
            .filter(|link| {
                link.state() == LinkState::Negotiating && link.opened_at() + timeout <= now
            })
            .map(PeerLink::remote_id)
            .collect();
        for remote_id in stalled {
            self.close_link(remote_id, CloseReason::Timeout).await;
        }
    }

    async fn on_transport_lost(&mut self, status: ConnectivityStatus) {
        self.connectivity = status;
        self.held.clear();
        if self.local_id.is_none() && self.links.is_empty() {
            return;
        }
        warn!(
            target: "peer.orchestrator",
            status = ?status,
            links = self.links.len(),
            "Hub connection lost, closing peer links"
        );
        // The hub assigns a new id on rejoin, so these links cannot continue
        self.close_all_links(CloseReason::TransportLost).await;
        self.local_id = None;
        self.roster.clear();
    }

    async fn close_link(&mut self, remote_id: ParticipantId, reason: CloseReason) {
        if let Some(mut link) = self.links.remove(&remote_id) {
            link.close().await;
            info!(
                target: "peer.link",
                remote_id = %remote_id,
                reason = reason.as_str(),
                "Peer link closed"
            );
        }
    }

    async fn close_all_links(&mut self, reason: CloseReason) {
        let remote_ids: Vec<ParticipantId> = self.links.keys().copied().collect();
        for remote_id in remote_ids {
            self.close_link(remote_id, reason).await;
        }
    }

    async fn teardown(&mut self, send_leave: bool) {
        if send_leave && self.local_id.is_some() {
            self.send_to_hub(ClientMessage::Leave);
        }
        info!(
            target: "peer.orchestrator",
            links = self.links.len(),
            "Tearing down session"
        );
        self.close_all_links(CloseReason::Teardown).await;
        self.probe.release_all(&mut self.media);
        self.local_id = None;
        self.held.clear();
        self.roster.clear();
        self.connectivity = ConnectivityStatus::Disconnected;
        self.publish();
    }

    fn send_signal(&self, recipient_id: ParticipantId, payload: &SignalPayload) {
        match payload.encode() {
            Ok(payload) => self.send_to_hub(ClientMessage::Signal {
                recipient_id,
                payload,
            }),
            Err(e) => {
                warn!(target: "peer.orchestrator", remote_id = %recipient_id, error = %e, "Failed to encode signal");
            }
        }
    }

    fn send_to_hub(&self, message: ClientMessage) {
        let kind = message.kind();
        // Never block on the hub client: it may be blocked delivering to us
        if let Err(e) = self.hub_tx.try_send(message) {
            warn!(target: "peer.orchestrator", kind, error = %e, "Dropped outbound hub frame");
        }
    }

    fn publish(&self) {
        let view = project(&ViewSource {
            local_id: self.local_id,
            display_name: &self.config.display_name,
            media: &self.media,
            links: &self.links,
            roster: &self.roster,
            chat: &self.chat,
            connectivity: self.connectivity,
        });
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }
}

/// Frames that only make sense once our own id is known.
fn needs_local_id(message: &ServerMessage) -> bool {
    matches!(
        message,
        ServerMessage::ParticipantJoined { .. }
            | ServerMessage::ParticipantLeft { .. }
            | ServerMessage::Signal { .. }
    )
}
