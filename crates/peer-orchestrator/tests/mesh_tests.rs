//! End-to-end mesh tests: real hub, real WebSocket hub clients, mock engines.

// Test code is allowed to use expect/unwrap for assertions
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use common::types::ParticipantId;
use hub_test_utils::TestHubServer;
use peer_orchestrator::config::{OrchestratorConfig, ReconnectPolicy};
use peer_orchestrator::engine::mock::{EngineCall, MockMediaEngine};
use peer_orchestrator::engine::ConnectionState;
use peer_orchestrator::history::InMemorySessionHistory;
use peer_orchestrator::media::mock::MockCaptureDevices;
use peer_orchestrator::media::MediaProbe;
use peer_orchestrator::signal::SdpKind;
use peer_orchestrator::{ConnectivityStatus, MembershipView, OrchestratorHandle, PeerOrchestrator};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

struct Peer {
    handle: OrchestratorHandle,
    task: JoinHandle<()>,
    engine: MockMediaEngine,
    id: ParticipantId,
}

impl Peer {
    async fn join(server: &TestHubServer, session_key: &str, name: &str) -> Self {
        let mut config = OrchestratorConfig::new(session_key, name);
        config.hub_url = server.url();
        config.reconnect = ReconnectPolicy {
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(50),
            max_attempts: Some(2),
        };

        let engine = MockMediaEngine::new();
        let (handle, task) = PeerOrchestrator::connect(
            config,
            Arc::new(engine.clone()),
            MediaProbe::new(Arc::new(MockCaptureDevices::granting())),
            Arc::new(InMemorySessionHistory::new()),
            CancellationToken::new(),
        );

        let view = wait_view(&handle, |v| v.local.participant_id.is_some()).await;
        assert_eq!(view.connectivity, ConnectivityStatus::Connected);
        Self {
            id: view.local.participant_id.unwrap(),
            handle,
            task,
            engine,
        }
    }

    async fn wait_for_call(&self, remote: ParticipantId, call: EngineCall) {
        for _ in 0..250 {
            if self.engine.calls_for(remote).contains(&call) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("{call:?} never made toward {remote}");
    }
}

async fn wait_view(
    handle: &OrchestratorHandle,
    pred: impl FnMut(&MembershipView) -> bool,
) -> MembershipView {
    let mut rx = handle.view();
    let view = tokio::time::timeout(WAIT, rx.wait_for(pred))
        .await
        .expect("view condition not reached")
        .expect("view channel open");
    (*view).clone()
}

/// Walk one pair through offer/answer and report both engines connected.
async fn connect_pair(offerer: &Peer, answerer: &Peer) {
    offerer
        .wait_for_call(answerer.id, EngineCall::SetLocalDescription(SdpKind::Offer))
        .await;
    answerer
        .wait_for_call(offerer.id, EngineCall::SetLocalDescription(SdpKind::Answer))
        .await;
    offerer
        .wait_for_call(answerer.id, EngineCall::SetRemoteDescription(SdpKind::Answer))
        .await;

    assert!(
        offerer
            .engine
            .report_state(answerer.id, ConnectionState::Connected)
            .await
    );
    assert!(
        answerer
            .engine
            .report_state(offerer.id, ConnectionState::Connected)
            .await
    );
    let answerer_id = answerer.id;
    let offerer_id = offerer.id;
    wait_view(&offerer.handle, |v| v.remote(answerer_id).is_some()).await;
    wait_view(&answerer.handle, |v| v.remote(offerer_id).is_some()).await;
}

#[tokio::test]
async fn test_two_peers_negotiate_through_hub() {
    let server = TestHubServer::spawn().await.unwrap();
    let alice = Peer::join(&server, "/room1", "alice").await;
    let bob = Peer::join(&server, "/room1", "bob").await;

    connect_pair(&alice, &bob).await;

    // Newcomer never offers
    assert!(!bob.engine.calls_for(alice.id).contains(&EngineCall::CreateOffer));

    // Local candidates cross the hub and land after the remote description
    assert!(alice.engine.report_candidate(bob.id, "a-cand-1").await);
    bob.wait_for_call(alice.id, EngineCall::AddIceCandidate("a-cand-1".to_string()))
        .await;

    let view = alice.handle.current_view();
    assert_eq!(view.remote(bob.id).unwrap().display_name, "bob");
    let view = bob.handle.current_view();
    assert_eq!(view.remote(alice.id).unwrap().display_name, "alice");
}

#[tokio::test]
async fn test_third_peer_answers_both_existing_members() {
    let server = TestHubServer::spawn().await.unwrap();
    let alice = Peer::join(&server, "/room1", "alice").await;
    let bob = Peer::join(&server, "/room1", "bob").await;
    connect_pair(&alice, &bob).await;

    let carol = Peer::join(&server, "/room1", "carol").await;
    connect_pair(&alice, &carol).await;
    connect_pair(&bob, &carol).await;

    assert_eq!(carol.engine.connections_created(), 2);
    assert!(!carol
        .engine
        .calls()
        .iter()
        .any(|c| c.call == EngineCall::CreateOffer));

    // Remotes are listed in join order
    let view = carol.handle.current_view();
    let order: Vec<ParticipantId> = view.remotes.iter().map(|r| r.participant_id).collect();
    assert_eq!(order, vec![alice.id, bob.id]);
}

#[tokio::test]
async fn test_leaving_peer_disappears_from_remaining_views() {
    let server = TestHubServer::spawn().await.unwrap();
    let alice = Peer::join(&server, "/room1", "alice").await;
    let bob = Peer::join(&server, "/room1", "bob").await;
    let carol = Peer::join(&server, "/room1", "carol").await;
    connect_pair(&alice, &bob).await;
    connect_pair(&alice, &carol).await;
    connect_pair(&bob, &carol).await;

    let bob_id = bob.id;
    bob.handle.leave().await.unwrap();
    tokio::time::timeout(WAIT, bob.task).await.unwrap().unwrap();

    let view = wait_view(&alice.handle, |v| v.remote(bob_id).is_none()).await;
    assert!(view.remote(carol.id).is_some());
    wait_view(&carol.handle, |v| v.remote(bob_id).is_none()).await;
    alice.wait_for_call(bob_id, EngineCall::Close).await;
}

#[tokio::test]
async fn test_chat_reaches_other_members_once() {
    let server = TestHubServer::spawn().await.unwrap();
    let alice = Peer::join(&server, "/room1", "alice").await;
    let bob = Peer::join(&server, "/room1", "bob").await;

    alice.handle.send_chat("hello bob").await.unwrap();

    let view = wait_view(&bob.handle, |v| v.unread_chat == 1).await;
    assert_eq!(view.chat.len(), 1);
    assert_eq!(view.chat[0].sender_name, "alice");
    assert_eq!(view.chat[0].sender_id, alice.id);
    assert!(!view.chat[0].is_local);

    let view = alice.handle.current_view();
    assert_eq!(view.chat.len(), 1);
    assert!(view.chat[0].is_local);
}

#[tokio::test]
async fn test_sessions_do_not_mix() {
    let server = TestHubServer::spawn().await.unwrap();
    let alice = Peer::join(&server, "/room1", "alice").await;
    let bob = Peer::join(&server, "/room2", "bob").await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(alice.engine.connections_created(), 0);
    assert_eq!(bob.engine.connections_created(), 0);
}

#[tokio::test]
async fn test_hub_loss_closes_links() {
    let server = TestHubServer::spawn().await.unwrap();
    let alice = Peer::join(&server, "/room1", "alice").await;
    let bob = Peer::join(&server, "/room1", "bob").await;
    connect_pair(&alice, &bob).await;

    let bob_id = bob.id;
    drop(server);

    let view = wait_view(&alice.handle, |v| {
        v.connectivity != ConnectivityStatus::Connected
    })
    .await;
    assert!(view.remotes.is_empty());
    assert_eq!(view.local.participant_id, None);
    alice.wait_for_call(bob_id, EngineCall::Close).await;

    // Reconnect attempts are bounded
    wait_view(&alice.handle, |v| {
        v.connectivity == ConnectivityStatus::Disconnected
    })
    .await;
}
