//! Orchestrator state-machine tests.
//!
//! Drives a `PeerOrchestrator` over an in-memory hub channel with the mock
//! engine and mock capture devices.

// Test code is allowed to use expect/unwrap for assertions
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use common::protocol::{ClientMessage, Member, ServerMessage};
use common::types::ParticipantId;
use peer_orchestrator::client::{ConnectivityStatus, HubChannel, HubEndpoint, HubEvent};
use peer_orchestrator::config::OrchestratorConfig;
use peer_orchestrator::engine::mock::{EngineCall, MockMediaEngine};
use peer_orchestrator::engine::ConnectionState;
use peer_orchestrator::history::{InMemorySessionHistory, SessionHistory};
use peer_orchestrator::media::mock::MockCaptureDevices;
use peer_orchestrator::media::{MediaKind, MediaProbe, TrackSource};
use peer_orchestrator::signal::{IceCandidate, SdpKind, SessionDescription, SignalPayload};
use peer_orchestrator::{MembershipView, OrchestratorError, OrchestratorHandle, PeerOrchestrator};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(2);

struct Harness {
    handle: OrchestratorHandle,
    task: JoinHandle<()>,
    hub: HubEndpoint,
    engine: MockMediaEngine,
    devices: Arc<MockCaptureDevices>,
    history: Arc<InMemorySessionHistory>,
    local_id: ParticipantId,
    members: Vec<Member>,
    barrier_seq: usize,
}

fn member(id: ParticipantId, name: &str) -> Member {
    Member {
        participant_id: id,
        display_name: name.to_string(),
    }
}

impl Harness {
    async fn start() -> Self {
        Self::start_with(OrchestratorConfig::new("room1", "alice"), MockCaptureDevices::granting())
            .await
    }

    async fn start_with(config: OrchestratorConfig, devices: MockCaptureDevices) -> Self {
        let (channel, hub) = HubChannel::pair(64);
        let engine = MockMediaEngine::new();
        let devices = Arc::new(devices);
        let history = Arc::new(InMemorySessionHistory::new());
        let (handle, task) = PeerOrchestrator::spawn(
            config,
            Arc::new(engine.clone()),
            MediaProbe::new(devices.clone()),
            history.clone(),
            channel,
            CancellationToken::new(),
        );
        Self {
            handle,
            task,
            hub,
            engine,
            devices,
            history,
            local_id: ParticipantId::new(),
            members: Vec::new(),
            barrier_seq: 0,
        }
    }

    async fn hub_says(&self, message: ServerMessage) {
        self.hub.events.send(HubEvent::Message(message)).await.unwrap();
    }

    async fn status(&self, status: ConnectivityStatus) {
        self.hub.events.send(HubEvent::Status(status)).await.unwrap();
    }

    async fn next_outbound(&mut self) -> ClientMessage {
        tokio::time::timeout(WAIT, self.hub.outbound.recv())
            .await
            .expect("outbound frame expected")
            .expect("outbound channel open")
    }

    async fn expect_signal(&mut self) -> (ParticipantId, SignalPayload) {
        match self.next_outbound().await {
            ClientMessage::Signal {
                recipient_id,
                payload,
            } => (recipient_id, SignalPayload::decode(&payload).unwrap()),
            other => panic!("Expected signal, got {other:?}"),
        }
    }

    /// Connect and join with the given existing members (self appended last).
    async fn join(&mut self, others: &[Member]) {
        self.status(ConnectivityStatus::Connected).await;
        match self.next_outbound().await {
            ClientMessage::Join {
                session_key,
                display_name,
            } => {
                assert_eq!(session_key.as_str(), "room1");
                assert_eq!(display_name, "alice");
            }
            other => panic!("Expected join, got {other:?}"),
        }
        self.members = others.to_vec();
        self.members.push(member(self.local_id, "alice"));
        self.hub_says(ServerMessage::Joined {
            participant_id: self.local_id,
            members: self.members.clone(),
        })
        .await;
        let local_id = self.local_id;
        self.wait_view(|v| v.local.participant_id == Some(local_id))
            .await;
    }

    /// Every hub event sent before this call has been processed.
    async fn barrier(&mut self) {
        self.barrier_seq += 1;
        let marker = format!("barrier-{}", self.barrier_seq);
        self.hub_says(ServerMessage::Chat {
            text: marker.clone(),
            sender_name: "barrier".to_string(),
            sender_id: ParticipantId::new(),
        })
        .await;
        self.wait_view(|v| v.chat.iter().any(|c| c.text == marker))
            .await;
    }

    async fn wait_view(&self, pred: impl FnMut(&MembershipView) -> bool) -> MembershipView {
        let mut rx = self.handle.view();
        let view = tokio::time::timeout(WAIT, rx.wait_for(pred))
            .await
            .expect("view condition not reached")
            .expect("view channel open");
        (*view).clone()
    }

    async fn wait_engine(&self, mut pred: impl FnMut(&MockMediaEngine) -> bool) {
        for _ in 0..200 {
            if pred(&self.engine) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("engine condition not reached");
    }

    /// Remote joins after us: we offer, then the engine connects.
    async fn connected_remote(&mut self, name: &str) -> ParticipantId {
        let remote = ParticipantId::new();
        self.members.push(member(remote, name));
        self.hub_says(ServerMessage::ParticipantJoined {
            participant_id: remote,
            members: self.members.clone(),
        })
        .await;
        let (to, payload) = self.expect_signal().await;
        assert_eq!(to, remote);
        assert_eq!(payload.kind(), "offer");
        self.hub_says(ServerMessage::Signal {
            sender_id: remote,
            payload: SignalPayload::Sdp(SessionDescription::answer("v=0"))
                .encode()
                .unwrap(),
        })
        .await;
        assert!(self.engine.report_state(remote, ConnectionState::Connected).await);
        self.wait_view(|v| v.remote(remote).is_some()).await;
        remote
    }
}

fn offer_payload() -> String {
    SignalPayload::Sdp(SessionDescription::offer("v=0\r\n"))
        .encode()
        .unwrap()
}

fn candidate_payload(name: &str) -> String {
    SignalPayload::Ice(IceCandidate {
        candidate: name.to_string(),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
    })
    .encode()
    .unwrap()
}

#[tokio::test]
async fn test_existing_member_offers_to_newcomer() {
    let mut h = Harness::start().await;
    h.join(&[]).await;

    let bob = ParticipantId::new();
    h.hub_says(ServerMessage::ParticipantJoined {
        participant_id: bob,
        members: vec![member(h.local_id, "alice"), member(bob, "bob")],
    })
    .await;

    let (to, payload) = h.expect_signal().await;
    assert_eq!(to, bob);
    assert_eq!(payload.kind(), "offer");

    let calls = h.engine.calls_for(bob);
    assert_eq!(calls[0], EngineCall::CreateConnection);
    let adds = calls
        .iter()
        .filter(|c| matches!(c, EngineCall::AddTrack { .. }))
        .count();
    assert_eq!(adds, 2);
    let offer_at = calls.iter().position(|c| *c == EngineCall::CreateOffer).unwrap();
    assert!(calls[..offer_at]
        .iter()
        .filter(|c| matches!(c, EngineCall::AddTrack { .. }))
        .count()
        == 2);

    // Not in the view until connected
    assert!(h.handle.current_view().remote(bob).is_none());
}

#[tokio::test]
async fn test_newcomer_does_not_offer() {
    let mut h = Harness::start().await;
    let existing = ParticipantId::new();
    h.join(&[member(existing, "ann")]).await;
    h.barrier().await;

    assert_eq!(h.engine.connections_created(), 0);
    assert!(h.hub.outbound.try_recv().is_err());
}

#[tokio::test]
async fn test_own_participant_joined_is_ignored() {
    let mut h = Harness::start().await;
    h.join(&[]).await;
    h.hub_says(ServerMessage::ParticipantJoined {
        participant_id: h.local_id,
        members: vec![member(h.local_id, "alice")],
    })
    .await;
    h.barrier().await;
    assert_eq!(h.engine.connections_created(), 0);
}

#[tokio::test]
async fn test_answerer_applies_offer_and_answers() {
    let mut h = Harness::start().await;
    let ann = ParticipantId::new();
    h.join(&[member(ann, "ann")]).await;

    h.hub_says(ServerMessage::Signal {
        sender_id: ann,
        payload: offer_payload(),
    })
    .await;

    let (to, payload) = h.expect_signal().await;
    assert_eq!(to, ann);
    assert_eq!(payload.kind(), "answer");

    let calls = h.engine.calls_for(ann);
    assert_eq!(calls[0], EngineCall::CreateConnection);
    assert_eq!(calls[1], EngineCall::SetRemoteDescription(SdpKind::Offer));
    assert_eq!(
        calls.last(),
        Some(&EngineCall::SetLocalDescription(SdpKind::Answer))
    );

    assert!(h.engine.report_state(ann, ConnectionState::Connected).await);
    let view = h.wait_view(|v| v.remote(ann).is_some()).await;
    assert_eq!(view.remote(ann).unwrap().display_name, "ann");
}

#[tokio::test]
async fn test_candidates_applied_only_after_remote_description() {
    let mut h = Harness::start().await;
    let ann = ParticipantId::new();
    h.join(&[member(ann, "ann")]).await;

    for name in ["c1", "c2"] {
        h.hub_says(ServerMessage::Signal {
            sender_id: ann,
            payload: candidate_payload(name),
        })
        .await;
    }
    h.hub_says(ServerMessage::Signal {
        sender_id: ann,
        payload: offer_payload(),
    })
    .await;
    let _answer = h.expect_signal().await;

    let calls = h.engine.calls_for(ann);
    let remote_set = calls
        .iter()
        .position(|c| *c == EngineCall::SetRemoteDescription(SdpKind::Offer))
        .unwrap();
    let first_candidate = calls
        .iter()
        .position(|c| matches!(c, EngineCall::AddIceCandidate(_)))
        .unwrap();
    assert!(remote_set < first_candidate);
    assert_eq!(
        calls
            .iter()
            .filter(|c| matches!(c, EngineCall::AddIceCandidate(_)))
            .cloned()
            .collect::<Vec<_>>(),
        vec![
            EngineCall::AddIceCandidate("c1".to_string()),
            EngineCall::AddIceCandidate("c2".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_local_candidates_are_sent_to_remote() {
    let mut h = Harness::start().await;
    h.join(&[]).await;
    let bob = h.connected_remote("bob").await;

    assert!(h.engine.report_candidate(bob, "local-c1").await);
    let (to, payload) = h.expect_signal().await;
    assert_eq!(to, bob);
    assert!(matches!(payload, SignalPayload::Ice(c) if c.candidate == "local-c1"));
}

#[tokio::test]
async fn test_participant_left_closes_link_and_leaves_view() {
    let mut h = Harness::start().await;
    h.join(&[]).await;
    let bob = h.connected_remote("bob").await;

    h.hub_says(ServerMessage::ParticipantLeft {
        participant_id: bob,
    })
    .await;
    h.wait_view(|v| v.remotes.is_empty()).await;
    assert_eq!(h.engine.calls_for(bob).last(), Some(&EngineCall::Close));
}

#[tokio::test]
async fn test_engine_failure_closes_only_that_link() {
    let mut h = Harness::start().await;
    h.join(&[]).await;
    let bob = h.connected_remote("bob").await;
    let carol = h.connected_remote("carol").await;

    assert!(h.engine.report_state(bob, ConnectionState::Failed).await);
    let view = h.wait_view(|v| v.remote(bob).is_none()).await;
    assert_eq!(view.remote(carol).unwrap().display_name, "carol");
}

#[tokio::test]
async fn test_remote_tracks_appear_in_view() {
    let mut h = Harness::start().await;
    h.join(&[]).await;
    let bob = h.connected_remote("bob").await;

    assert!(h.engine.report_track(bob, "bob-video", MediaKind::Video).await);
    let view = h
        .wait_view(|v| v.remote(bob).is_some_and(|r| !r.tracks.is_empty()))
        .await;
    assert_eq!(view.remote(bob).unwrap().tracks[0].id, "bob-video");
}

#[tokio::test]
async fn test_malformed_signal_payload_is_dropped() {
    let mut h = Harness::start().await;
    let ann = ParticipantId::new();
    h.join(&[member(ann, "ann")]).await;
    h.hub_says(ServerMessage::Signal {
        sender_id: ann,
        payload: "not json".to_string(),
    })
    .await;
    h.barrier().await;
    assert_eq!(h.engine.connections_created(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_negotiation_times_out() {
    let mut config = OrchestratorConfig::new("room1", "alice");
    config.negotiation_timeout = Duration::from_secs(5);
    let mut h = Harness::start_with(config, MockCaptureDevices::granting()).await;
    h.join(&[]).await;

    let bob = ParticipantId::new();
    h.hub_says(ServerMessage::ParticipantJoined {
        participant_id: bob,
        members: vec![member(h.local_id, "alice"), member(bob, "bob")],
    })
    .await;
    let _offer = h.expect_signal().await;

    tokio::time::advance(Duration::from_secs(6)).await;
    h.wait_engine(|e| e.calls_for(bob).last() == Some(&EngineCall::Close))
        .await;

    // A late connected report for the closed link changes nothing
    assert!(h.engine.report_state(bob, ConnectionState::Connected).await);
    h.barrier().await;
    assert!(h.handle.current_view().remotes.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_late_event_from_replaced_connection_is_ignored() {
    let mut config = OrchestratorConfig::new("room1", "alice");
    config.negotiation_timeout = Duration::from_secs(5);
    let mut h = Harness::start_with(config, MockCaptureDevices::granting()).await;
    h.join(&[]).await;

    let bob = ParticipantId::new();
    h.hub_says(ServerMessage::ParticipantJoined {
        participant_id: bob,
        members: vec![member(h.local_id, "alice"), member(bob, "bob")],
    })
    .await;
    let _offer = h.expect_signal().await;
    tokio::time::advance(Duration::from_secs(6)).await;
    h.wait_engine(|e| e.calls_for(bob).last() == Some(&EngineCall::Close))
        .await;

    // Bob's own offer opens a fresh answering link
    h.hub_says(ServerMessage::Signal {
        sender_id: bob,
        payload: offer_payload(),
    })
    .await;
    let (to, payload) = h.expect_signal().await;
    assert_eq!(to, bob);
    assert_eq!(payload.kind(), "answer");

    let connections = h.engine.connections_to(bob);
    assert_eq!(connections.len(), 2);
    assert_ne!(connections[0], connections[1]);

    // The first connection reports its closure only now
    assert!(
        h.engine
            .report_state_on(connections[0], ConnectionState::Closed)
            .await
    );
    h.barrier().await;
    let closes = h
        .engine
        .calls_for(bob)
        .iter()
        .filter(|c| **c == EngineCall::Close)
        .count();
    assert_eq!(closes, 1, "replacement link must survive");

    assert!(h.engine.report_state(bob, ConnectionState::Connected).await);
    h.wait_view(|v| v.remote(bob).is_some()).await;
}

#[tokio::test]
async fn test_participant_joined_before_own_joined_is_replayed() {
    let mut h = Harness::start().await;
    h.status(ConnectivityStatus::Connected).await;
    assert!(matches!(
        h.next_outbound().await,
        ClientMessage::Join { .. }
    ));

    let bob = ParticipantId::new();
    let alice = member(h.local_id, "alice");
    h.hub_says(ServerMessage::ParticipantJoined {
        participant_id: bob,
        members: vec![alice.clone(), member(bob, "bob")],
    })
    .await;
    h.barrier().await;
    assert_eq!(h.engine.connections_created(), 0);

    h.hub_says(ServerMessage::Joined {
        participant_id: h.local_id,
        members: vec![alice],
    })
    .await;

    // Bob joined after us, so we still offer
    let (to, payload) = h.expect_signal().await;
    assert_eq!(to, bob);
    assert_eq!(payload.kind(), "offer");

    assert!(h.engine.report_state(bob, ConnectionState::Connected).await);
    let view = h.wait_view(|v| v.remote(bob).is_some()).await;
    assert_eq!(view.remote(bob).unwrap().display_name, "bob");
}

#[tokio::test]
async fn test_signal_before_own_joined_is_replayed() {
    let mut h = Harness::start().await;
    h.status(ConnectivityStatus::Connected).await;
    assert!(matches!(
        h.next_outbound().await,
        ClientMessage::Join { .. }
    ));

    let ann = ParticipantId::new();
    h.hub_says(ServerMessage::Signal {
        sender_id: ann,
        payload: offer_payload(),
    })
    .await;
    h.barrier().await;
    assert_eq!(h.engine.connections_created(), 0);

    h.hub_says(ServerMessage::Joined {
        participant_id: h.local_id,
        members: vec![member(ann, "ann"), member(h.local_id, "alice")],
    })
    .await;

    let (to, payload) = h.expect_signal().await;
    assert_eq!(to, ann);
    assert_eq!(payload.kind(), "answer");
}

#[tokio::test]
async fn test_frames_held_before_join_are_dropped_on_transport_loss() {
    let mut h = Harness::start().await;
    h.status(ConnectivityStatus::Connected).await;
    assert!(matches!(
        h.next_outbound().await,
        ClientMessage::Join { .. }
    ));

    let bob = ParticipantId::new();
    h.hub_says(ServerMessage::ParticipantJoined {
        participant_id: bob,
        members: vec![member(bob, "bob")],
    })
    .await;

    h.status(ConnectivityStatus::Reconnecting { attempt: 1 })
        .await;
    h.join(&[]).await;
    h.barrier().await;

    assert_eq!(h.engine.connections_created(), 0);
    assert!(h.hub.outbound.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_zero_timeout_disables_expiry() {
    let mut config = OrchestratorConfig::new("room1", "alice");
    config.negotiation_timeout = Duration::ZERO;
    let mut h = Harness::start_with(config, MockCaptureDevices::granting()).await;
    h.join(&[]).await;

    let bob = ParticipantId::new();
    h.hub_says(ServerMessage::ParticipantJoined {
        participant_id: bob,
        members: vec![member(h.local_id, "alice"), member(bob, "bob")],
    })
    .await;
    let _offer = h.expect_signal().await;

    tokio::time::advance(Duration::from_secs(600)).await;
    h.barrier().await;
    assert!(!h.engine.calls_for(bob).contains(&EngineCall::Close));

    assert!(h.engine.report_state(bob, ConnectionState::Connected).await);
    h.wait_view(|v| v.remote(bob).is_some()).await;
}

#[tokio::test]
async fn test_mute_toggles_do_not_renegotiate() {
    let mut h = Harness::start().await;
    h.join(&[]).await;
    let bob = h.connected_remote("bob").await;
    let calls_before = h.engine.calls_for(bob).len();

    assert!(!h.handle.toggle_video().await.unwrap());
    assert!(!h.handle.toggle_audio().await.unwrap());
    assert!(h.handle.toggle_video().await.unwrap());

    let view = h.handle.current_view();
    assert!(view.local.video_enabled);
    assert!(!view.local.audio_enabled);
    let camera_id = view.local.video.as_ref().unwrap().id.clone();
    assert_eq!(h.devices.is_enabled(&camera_id), Some(true));

    assert_eq!(h.engine.calls_for(bob).len(), calls_before);
    assert!(h.hub.outbound.try_recv().is_err());
}

#[tokio::test]
async fn test_screen_share_swaps_video_in_place_and_restores_camera() {
    let mut h = Harness::start().await;
    h.join(&[]).await;
    let bob = h.connected_remote("bob").await;
    let camera_id = h.handle.current_view().local.video.unwrap().id;

    assert!(h.handle.toggle_screen_share().await.unwrap());
    let view = h.handle.current_view();
    assert!(view.local.screen_sharing);
    let screen = view.local.video.unwrap();
    assert_eq!(screen.source, TrackSource::Screen);

    let calls = h.engine.calls_for(bob);
    assert!(matches!(
        calls.last(),
        Some(EngineCall::ReplaceTrack { track_id: Some(id), .. }) if *id == screen.id
    ));
    let video_adds = calls
        .iter()
        .filter(|c| matches!(c, EngineCall::AddTrack { track_id, .. } if track_id.starts_with("camera") || track_id.starts_with("screen")))
        .count();
    assert_eq!(video_adds, 1);

    assert!(!h.handle.toggle_screen_share().await.unwrap());
    assert!(matches!(
        h.engine.calls_for(bob).last(),
        Some(EngineCall::ReplaceTrack { track_id: Some(id), .. }) if *id == camera_id
    ));
    assert!(h.devices.released().contains(&screen.id));
    assert!(!h.handle.current_view().local.screen_sharing);
}

#[tokio::test]
async fn test_screen_share_without_camera_renegotiates() {
    let mut h = Harness::start_with(
        OrchestratorConfig::new("room1", "alice"),
        MockCaptureDevices::denying_video(),
    )
    .await;
    h.join(&[]).await;
    let bob = h.connected_remote("bob").await;

    assert!(h.handle.toggle_screen_share().await.unwrap());
    let (to, payload) = h.expect_signal().await;
    assert_eq!(to, bob);
    assert_eq!(payload.kind(), "offer");

    // Stopping clears the sender rather than adding another
    h.handle.stop_screen_share().await.unwrap();
    assert!(matches!(
        h.engine.calls_for(bob).last(),
        Some(EngineCall::ReplaceTrack { track_id: None, .. })
    ));
}

#[tokio::test]
async fn test_host_ending_display_capture_restores_camera() {
    let mut h = Harness::start().await;
    h.join(&[]).await;
    let _bob = h.connected_remote("bob").await;

    assert!(h.handle.toggle_screen_share().await.unwrap());
    h.handle.screen_track_ended().await.unwrap();
    let view = h.wait_view(|v| !v.local.screen_sharing).await;
    assert_eq!(view.local.video.unwrap().source, TrackSource::Camera);
}

#[tokio::test]
async fn test_screen_share_denied_leaves_state_unchanged() {
    let mut h = Harness::start_with(
        OrchestratorConfig::new("room1", "alice"),
        MockCaptureDevices::granting().with_display_denied(),
    )
    .await;
    h.join(&[]).await;

    let err = h.handle.toggle_screen_share().await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Capture(_)));
    assert!(!h.handle.current_view().local.screen_sharing);
}

#[tokio::test]
async fn test_capture_denied_still_joins_and_offers_without_tracks() {
    let mut h = Harness::start_with(
        OrchestratorConfig::new("room1", "alice"),
        MockCaptureDevices::denying_all(),
    )
    .await;
    h.join(&[]).await;
    let view = h.handle.current_view();
    assert!(view.local.video.is_none());
    assert!(!view.local.has_audio);

    let bob = ParticipantId::new();
    h.hub_says(ServerMessage::ParticipantJoined {
        participant_id: bob,
        members: vec![member(h.local_id, "alice"), member(bob, "bob")],
    })
    .await;
    let (_, payload) = h.expect_signal().await;
    assert_eq!(payload.kind(), "offer");
    assert!(!h
        .engine
        .calls_for(bob)
        .iter()
        .any(|c| matches!(c, EngineCall::AddTrack { .. })));
}

#[tokio::test]
async fn test_chat_flow() {
    let mut h = Harness::start().await;

    let err = h.handle.send_chat("too early").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotJoined));

    h.join(&[]).await;
    h.handle.send_chat("hello").await.unwrap();
    assert_eq!(
        h.next_outbound().await,
        ClientMessage::Chat {
            text: "hello".to_string()
        }
    );
    let view = h.handle.current_view();
    assert_eq!(view.chat.len(), 1);
    assert!(view.chat[0].is_local);
    assert_eq!(view.chat[0].sender_name, "alice");
    assert_eq!(view.unread_chat, 0);

    let bob = ParticipantId::new();
    h.hub_says(ServerMessage::Chat {
        text: "hi alice".to_string(),
        sender_name: "bob".to_string(),
        sender_id: bob,
    })
    .await;
    let view = h.wait_view(|v| v.unread_chat == 1).await;
    assert_eq!(view.chat[1].sender_id, bob);

    h.handle.mark_chat_read().await.unwrap();
    h.wait_view(|v| v.unread_chat == 0).await;
}

#[tokio::test]
async fn test_join_is_recorded_in_history() {
    let mut h = Harness::start().await;
    h.join(&[]).await;

    for _ in 0..100 {
        if !h.history.list_joins().await.unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let joins = h.history.list_joins().await.unwrap();
    assert_eq!(joins.len(), 1);
    assert_eq!(joins[0].session_key.as_str(), "room1");
}

#[tokio::test]
async fn test_transport_loss_closes_links_and_rejoins() {
    let mut h = Harness::start().await;
    h.join(&[]).await;
    let bob = h.connected_remote("bob").await;

    h.status(ConnectivityStatus::Reconnecting { attempt: 1 })
        .await;
    let view = h
        .wait_view(|v| v.connectivity == ConnectivityStatus::Reconnecting { attempt: 1 })
        .await;
    assert!(view.remotes.is_empty());
    assert_eq!(view.local.participant_id, None);
    assert_eq!(h.engine.calls_for(bob).last(), Some(&EngineCall::Close));

    h.status(ConnectivityStatus::Connected).await;
    assert!(matches!(
        h.next_outbound().await,
        ClientMessage::Join { .. }
    ));
}

#[tokio::test]
async fn test_leave_tears_everything_down() {
    let mut h = Harness::start().await;
    h.join(&[]).await;
    let bob = h.connected_remote("bob").await;

    h.handle.leave().await.unwrap();
    assert_eq!(h.next_outbound().await, ClientMessage::Leave);
    assert_eq!(h.engine.calls_for(bob).last(), Some(&EngineCall::Close));
    assert_eq!(h.devices.released().len(), 2);

    tokio::time::timeout(WAIT, &mut h.task).await.unwrap().unwrap();

    // Nothing is emitted after teardown
    assert!(!h.engine.report_candidate(bob, "late").await);
    assert!(h.hub.outbound.recv().await.is_none());

    let err = h.handle.toggle_audio().await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Internal(_)));
}

#[tokio::test]
async fn test_cancel_stops_without_leave() {
    let mut h = Harness::start().await;
    h.join(&[]).await;

    h.handle.cancel();
    tokio::time::timeout(WAIT, &mut h.task).await.unwrap().unwrap();
    assert!(h.hub.outbound.recv().await.is_none());
}
