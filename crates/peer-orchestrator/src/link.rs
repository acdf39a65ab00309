//! Per-remote negotiation state machine.
//!
//! ```text
//! (absent) ──offerer: participant-joined──▶ NEGOTIATING ──engine connected──▶ CONNECTED
//!          ──answerer: first signal──────▶      │                                  │
//!                                               └──failed / closed / timeout──▶ CLOSED ◀┘
//! ```
//!
//! Candidates that arrive before the remote description are queued and
//! flushed right after it is applied. A link never carries more than one
//! outgoing video sender: screen share swaps the track in place.

use crate::engine::{
    ConnectionId, ConnectionState, MediaConnection, MediaEngine, PeerEvent, RemoteTrack, SenderId,
};
use crate::errors::EngineError;
use crate::media::{LocalMedia, LocalTrack, MediaKind};
use crate::signal::{IceCandidate, SdpKind, SessionDescription, SignalPayload};
use common::types::ParticipantId;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Which side creates the offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Offerer,
    Answerer,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Offerer => "offerer",
            Role::Answerer => "answerer",
        }
    }
}

/// Lifecycle state of a link. Absent links are simply not in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Negotiating,
    Connected,
    Closed,
}

/// Why a link was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Remote left the session.
    PeerLeft,
    /// Engine reported failure or closure.
    ConnectionLost,
    /// Offer/answer handling failed.
    NegotiationFailed,
    /// Still negotiating when the timeout expired.
    Timeout,
    /// Hub connection dropped.
    TransportLost,
    /// Local participant left.
    Teardown,
}

impl CloseReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            CloseReason::PeerLeft => "peer_left",
            CloseReason::ConnectionLost => "connection_lost",
            CloseReason::NegotiationFailed => "negotiation_failed",
            CloseReason::Timeout => "timeout",
            CloseReason::TransportLost => "transport_lost",
            CloseReason::Teardown => "teardown",
        }
    }
}

/// Outcome of an engine state report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Connected,
    Closed,
}

/// One direct connection to a remote participant.
pub struct PeerLink {
    id: ConnectionId,
    role: Role,
    state: LinkState,
    connection: Box<dyn MediaConnection>,
    has_remote_description: bool,
    pending_candidates: Vec<IceCandidate>,
    tracks_attached: bool,
    audio_sender: Option<SenderId>,
    video_sender: Option<SenderId>,
    renegotiation_pending: bool,
    remote_tracks: Vec<RemoteTrack>,
    opened_at: Instant,
}

impl PeerLink {
    fn new(id: ConnectionId, role: Role, connection: Box<dyn MediaConnection>) -> Self {
        Self {
            id,
            role,
            state: LinkState::Negotiating,
            connection,
            has_remote_description: false,
            pending_candidates: Vec::new(),
            tracks_attached: false,
            audio_sender: None,
            video_sender: None,
            renegotiation_pending: false,
            remote_tracks: Vec::new(),
            opened_at: Instant::now(),
        }
    }

    /// Open a link as offerer: attach every local track and produce the offer.
    pub async fn open_offerer(
        engine: &dyn MediaEngine,
        id: ConnectionId,
        events: mpsc::Sender<PeerEvent>,
        media: &LocalMedia,
    ) -> Result<(Self, SignalPayload), EngineError> {
        let connection = engine.create_connection(id, events).await?;
        let mut link = Self::new(id, Role::Offerer, connection);

        match link.attach_and_offer(media).await {
            Ok(offer) => Ok((link, offer)),
            Err(e) => {
                link.close().await;
                Err(e)
            }
        }
    }

    /// Open a link as answerer. Nothing is emitted until the offer arrives.
    pub async fn open_answerer(
        engine: &dyn MediaEngine,
        id: ConnectionId,
        events: mpsc::Sender<PeerEvent>,
    ) -> Result<Self, EngineError> {
        let connection = engine.create_connection(id, events).await?;
        Ok(Self::new(id, Role::Answerer, connection))
    }

    #[must_use]
    pub fn remote_id(&self) -> ParticipantId {
        self.id.remote_id
    }

    /// The engine connection this link owns.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn state(&self) -> LinkState {
        self.state
    }

    #[must_use]
    pub fn remote_tracks(&self) -> &[RemoteTrack] {
        &self.remote_tracks
    }

    #[must_use]
    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    #[must_use]
    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Number of outgoing video senders (0 or 1).
    #[must_use]
    pub fn video_senders(&self) -> usize {
        usize::from(self.video_sender.is_some())
    }

    /// Apply a payload from the remote. Returns the reply to send, if any.
    pub async fn apply_signal(
        &mut self,
        payload: SignalPayload,
        media: &LocalMedia,
    ) -> Result<Option<SignalPayload>, EngineError> {
        if self.state == LinkState::Closed {
            return Err(EngineError::Closed);
        }

        match payload {
            SignalPayload::Sdp(description) => match description.kind {
                SdpKind::Offer => {
                    self.apply_remote_description(description).await?;
                    if !self.tracks_attached {
                        self.attach_tracks(media).await?;
                    }
                    let answer = self.connection.create_answer().await?;
                    self.connection
                        .set_local_description(answer.clone())
                        .await?;
                    debug!(
                        target: "peer.link",
                        remote_id = %self.id.remote_id,
                        "Answer created"
                    );
                    Ok(Some(SignalPayload::Sdp(answer)))
                }
                SdpKind::Answer => {
                    self.apply_remote_description(description).await?;
                    Ok(None)
                }
            },
            SignalPayload::Ice(candidate) => {
                if self.has_remote_description {
                    self.apply_candidate(candidate).await;
                } else {
                    debug!(
                        target: "peer.link",
                        remote_id = %self.id.remote_id,
                        queued = self.pending_candidates.len() + 1,
                        "Candidate queued until remote description"
                    );
                    self.pending_candidates.push(candidate);
                }
                Ok(None)
            }
        }
    }

    /// Feed an engine state report through the state machine.
    pub fn on_connection_state(&mut self, state: ConnectionState) -> Transition {
        match (self.state, state) {
            (LinkState::Negotiating, ConnectionState::Connected) => {
                self.state = LinkState::Connected;
                Transition::Connected
            }
            (
                LinkState::Negotiating | LinkState::Connected,
                ConnectionState::Failed | ConnectionState::Closed,
            )
            | (LinkState::Connected, ConnectionState::Disconnected) => {
                self.state = LinkState::Closed;
                Transition::Closed
            }
            // Disconnected while negotiating is transient
            _ => Transition::Unchanged,
        }
    }

    /// Record an incoming remote track. Duplicate ids are ignored.
    pub fn add_remote_track(&mut self, track: RemoteTrack) {
        if !self.remote_tracks.iter().any(|t| t.id == track.id) {
            self.remote_tracks.push(track);
        }
    }

    /// Point the outgoing video at `track` (screen, camera, or nothing).
    ///
    /// An existing video sender is swapped in place. Without one, the track
    /// is added and the link renegotiates; the returned offer must be sent.
    pub async fn set_outgoing_video(
        &mut self,
        track: Option<&LocalTrack>,
    ) -> Result<Option<SignalPayload>, EngineError> {
        if self.state == LinkState::Closed {
            return Ok(None);
        }

        if let Some(sender) = self.video_sender {
            self.connection.replace_track(sender, track).await?;
            return Ok(None);
        }

        // Answerer before the offer: tracks are attached from current media later
        let (Some(track), true) = (track, self.tracks_attached) else {
            return Ok(None);
        };

        let sender = self.connection.add_track(track).await?;
        self.video_sender = Some(sender);

        if self.state == LinkState::Connected {
            self.make_offer().await.map(Some)
        } else {
            self.renegotiation_pending = true;
            Ok(None)
        }
    }

    /// Produce the offer deferred while the first negotiation was in flight.
    pub async fn take_pending_renegotiation(
        &mut self,
    ) -> Result<Option<SignalPayload>, EngineError> {
        if !self.renegotiation_pending || self.state != LinkState::Connected {
            return Ok(None);
        }
        self.renegotiation_pending = false;
        self.make_offer().await.map(Some)
    }

    /// Release the media connection.
    pub async fn close(&mut self) {
        self.state = LinkState::Closed;
        self.pending_candidates.clear();
        self.connection.close().await;
    }

    async fn attach_and_offer(&mut self, media: &LocalMedia) -> Result<SignalPayload, EngineError> {
        self.attach_tracks(media).await?;
        self.make_offer().await
    }

    async fn attach_tracks(&mut self, media: &LocalMedia) -> Result<(), EngineError> {
        for track in media.outgoing_tracks() {
            let sender = self.connection.add_track(track).await?;
            match track.kind {
                MediaKind::Audio => self.audio_sender = Some(sender),
                MediaKind::Video => self.video_sender = Some(sender),
            }
        }
        self.tracks_attached = true;
        Ok(())
    }

    async fn make_offer(&mut self) -> Result<SignalPayload, EngineError> {
        let offer = self.connection.create_offer().await?;
        self.connection.set_local_description(offer.clone()).await?;
        debug!(
            target: "peer.link",
            remote_id = %self.id.remote_id,
            "Offer created"
        );
        Ok(SignalPayload::Sdp(offer))
    }

    async fn apply_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), EngineError> {
        self.connection.set_remote_description(description).await?;
        self.has_remote_description = true;

        let queued = std::mem::take(&mut self.pending_candidates);
        if !queued.is_empty() {
            debug!(
                target: "peer.link",
                remote_id = %self.id.remote_id,
                count = queued.len(),
                "Flushing queued candidates"
            );
        }
        for candidate in queued {
            self.apply_candidate(candidate).await;
        }
        Ok(())
    }

    async fn apply_candidate(&self, candidate: IceCandidate) {
        // A single bad candidate does not fail the link
        if let Err(e) = self.connection.add_ice_candidate(candidate).await {
            warn!(
                target: "peer.link",
                remote_id = %self.id.remote_id,
                error = %e,
                "Candidate rejected"
            );
        }
    }
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("connection", &self.id)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("pending_candidates", &self.pending_candidates.len())
            .field("remote_tracks", &self.remote_tracks.len())
            .finish_non_exhaustive()
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
    use crate::engine::mock::{EngineCall, MockMediaEngine};
    use crate::media::mock::MockCaptureDevices;
    use crate::media::MediaProbe;
    use std::sync::Arc;

    async fn media() -> (MediaProbe, LocalMedia) {
        let probe = MediaProbe::new(Arc::new(MockCaptureDevices::granting()));
        let media = probe.acquire(true, true).await;
        (probe, media)
    }

    fn conn(remote: ParticipantId) -> ConnectionId {
        ConnectionId::new(remote, 0)
    }

    fn candidate(name: &str) -> SignalPayload {
        SignalPayload::Ice(IceCandidate {
            candidate: name.to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        })
    }

    #[tokio::test]
    async fn test_offerer_attaches_tracks_before_offer() {
        let engine = MockMediaEngine::new();
        let (tx, _rx) = mpsc::channel(8);
        let (_probe, media) = media().await;
        let remote = ParticipantId::new();

        let (link, offer) = PeerLink::open_offerer(&engine, conn(remote), tx, &media)
            .await
            .unwrap();
        assert_eq!(link.role(), Role::Offerer);
        assert_eq!(link.state(), LinkState::Negotiating);
        assert_eq!(offer.kind(), "offer");

        let calls = engine.calls_for(remote);
        assert_eq!(calls[0], EngineCall::CreateConnection);
        assert!(matches!(calls[1], EngineCall::AddTrack { .. }));
        assert!(matches!(calls[2], EngineCall::AddTrack { .. }));
        assert_eq!(calls[3], EngineCall::CreateOffer);
        assert_eq!(calls[4], EngineCall::SetLocalDescription(SdpKind::Offer));
    }

    #[tokio::test]
    async fn test_answerer_emits_nothing_until_offer() {
        let engine = MockMediaEngine::new();
        let (tx, _rx) = mpsc::channel(8);
        let (_probe, media) = media().await;
        let remote = ParticipantId::new();

        let mut link = PeerLink::open_answerer(&engine, conn(remote), tx).await.unwrap();
        assert_eq!(engine.calls_for(remote), vec![EngineCall::CreateConnection]);

        let reply = link
            .apply_signal(
                SignalPayload::Sdp(SessionDescription::offer("v=0")),
                &media,
            )
            .await
            .unwrap();
        assert_eq!(reply.map(|r| r.kind()), Some("answer"));

        let calls = engine.calls_for(remote);
        assert_eq!(calls[1], EngineCall::SetRemoteDescription(SdpKind::Offer));
        assert!(matches!(calls[2], EngineCall::AddTrack { .. }));
        assert_eq!(calls.last(), Some(&EngineCall::SetLocalDescription(SdpKind::Answer)));
    }

    #[tokio::test]
    async fn test_candidates_before_description_are_queued_then_flushed_in_order() {
        let engine = MockMediaEngine::new();
        let (tx, _rx) = mpsc::channel(8);
        let (_probe, media) = media().await;
        let remote = ParticipantId::new();
        let mut link = PeerLink::open_answerer(&engine, conn(remote), tx).await.unwrap();

        link.apply_signal(candidate("c1"), &media).await.unwrap();
        link.apply_signal(candidate("c2"), &media).await.unwrap();
        assert_eq!(link.pending_candidates(), 2);
        assert_eq!(engine.calls_for(remote).len(), 1);

        link.apply_signal(
            SignalPayload::Sdp(SessionDescription::offer("v=0")),
            &media,
        )
        .await
        .unwrap();
        assert_eq!(link.pending_candidates(), 0);

        let calls = engine.calls_for(remote);
        let remote_set = calls
            .iter()
            .position(|c| *c == EngineCall::SetRemoteDescription(SdpKind::Offer))
            .unwrap();
        let c1 = calls
            .iter()
            .position(|c| *c == EngineCall::AddIceCandidate("c1".to_string()))
            .unwrap();
        let c2 = calls
            .iter()
            .position(|c| *c == EngineCall::AddIceCandidate("c2".to_string()))
            .unwrap();
        assert!(remote_set < c1 && c1 < c2);

        // Later candidates go straight through
        link.apply_signal(candidate("c3"), &media).await.unwrap();
        assert_eq!(
            engine.calls_for(remote).last(),
            Some(&EngineCall::AddIceCandidate("c3".to_string()))
        );
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let engine = MockMediaEngine::new();
        let (tx, _rx) = mpsc::channel(8);
        let mut link = PeerLink::open_answerer(&engine, conn(ParticipantId::new()), tx)
            .await
            .unwrap();

        assert_eq!(
            link.on_connection_state(ConnectionState::Connecting),
            Transition::Unchanged
        );
        assert_eq!(
            link.on_connection_state(ConnectionState::Disconnected),
            Transition::Unchanged
        );
        assert_eq!(link.state(), LinkState::Negotiating);
        assert_eq!(
            link.on_connection_state(ConnectionState::Connected),
            Transition::Connected
        );
        assert_eq!(
            link.on_connection_state(ConnectionState::Disconnected),
            Transition::Closed
        );
        assert_eq!(link.state(), LinkState::Closed);
        assert_eq!(
            link.on_connection_state(ConnectionState::Connected),
            Transition::Unchanged
        );
    }

    #[tokio::test]
    async fn test_failed_while_negotiating_closes() {
        let engine = MockMediaEngine::new();
        let (tx, _rx) = mpsc::channel(8);
        let mut link = PeerLink::open_answerer(&engine, conn(ParticipantId::new()), tx)
            .await
            .unwrap();
        assert_eq!(
            link.on_connection_state(ConnectionState::Failed),
            Transition::Closed
        );
    }

    #[tokio::test]
    async fn test_screen_share_replaces_existing_video_sender() {
        let engine = MockMediaEngine::new();
        let (tx, _rx) = mpsc::channel(8);
        let (probe, media) = media().await;
        let remote = ParticipantId::new();
        let (mut link, _offer) = PeerLink::open_offerer(&engine, conn(remote), tx, &media)
            .await
            .unwrap();
        link.on_connection_state(ConnectionState::Connected);

        let screen = probe.acquire_display().await.unwrap();
        let reply = link.set_outgoing_video(Some(&screen)).await.unwrap();
        assert!(reply.is_none());
        assert_eq!(link.video_senders(), 1);

        let calls = engine.calls_for(remote);
        assert!(matches!(
            calls.last(),
            Some(EngineCall::ReplaceTrack { track_id: Some(id), .. }) if *id == screen.id
        ));
        assert!(!calls.iter().any(
            |c| matches!(c, EngineCall::AddTrack { track_id, .. } if *track_id == screen.id)
        ));
    }

    #[tokio::test]
    async fn test_screen_share_without_camera_adds_track_and_renegotiates() {
        let engine = MockMediaEngine::new();
        let (tx, _rx) = mpsc::channel(8);
        let probe = MediaProbe::new(Arc::new(MockCaptureDevices::denying_video()));
        let media = probe.acquire(true, true).await;
        let remote = ParticipantId::new();
        let (mut link, _offer) = PeerLink::open_offerer(&engine, conn(remote), tx, &media)
            .await
            .unwrap();
        assert_eq!(link.video_senders(), 0);
        link.on_connection_state(ConnectionState::Connected);

        let screen = probe.acquire_display().await.unwrap();
        let reply = link.set_outgoing_video(Some(&screen)).await.unwrap();
        assert_eq!(reply.map(|r| r.kind()), Some("offer"));
        assert_eq!(link.video_senders(), 1);

        // Stopping with no camera clears the sender instead of adding another
        let reply = link.set_outgoing_video(None).await.unwrap();
        assert!(reply.is_none());
        assert_eq!(link.video_senders(), 1);
        assert!(matches!(
            engine.calls_for(remote).last(),
            Some(EngineCall::ReplaceTrack { track_id: None, .. })
        ));
    }

    #[tokio::test]
    async fn test_screen_share_while_negotiating_defers_offer() {
        let engine = MockMediaEngine::new();
        let (tx, _rx) = mpsc::channel(8);
        let probe = MediaProbe::new(Arc::new(MockCaptureDevices::denying_video()));
        let media = probe.acquire(true, true).await;
        let (mut link, _offer) =
            PeerLink::open_offerer(&engine, conn(ParticipantId::new()), tx, &media)
                .await
                .unwrap();

        let screen = probe.acquire_display().await.unwrap();
        assert!(link.set_outgoing_video(Some(&screen)).await.unwrap().is_none());
        assert!(link.take_pending_renegotiation().await.unwrap().is_none());

        link.on_connection_state(ConnectionState::Connected);
        let offer = link.take_pending_renegotiation().await.unwrap();
        assert_eq!(offer.map(|o| o.kind()), Some("offer"));
        assert!(link.take_pending_renegotiation().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_negotiation_failure_closes_connection() {
        let engine = MockMediaEngine::failing_negotiation();
        let (tx, _rx) = mpsc::channel(8);
        let (_probe, media) = media().await;
        let remote = ParticipantId::new();

        let result = PeerLink::open_offerer(&engine, conn(remote), tx, &media).await;
        assert!(result.is_err());
        assert_eq!(engine.calls_for(remote).last(), Some(&EngineCall::Close));
    }

    #[tokio::test]
    async fn test_remote_tracks_deduplicated() {
        let engine = MockMediaEngine::new();
        let (tx, _rx) = mpsc::channel(8);
        let mut link = PeerLink::open_answerer(&engine, conn(ParticipantId::new()), tx)
            .await
            .unwrap();
        let track = RemoteTrack {
            id: "t1".to_string(),
            kind: MediaKind::Video,
            stream_id: "s".to_string(),
        };
        link.add_remote_track(track.clone());
        link.add_remote_track(track);
        assert_eq!(link.remote_tracks().len(), 1);
    }
}
