//! Media engine seam.
//!
//! The real-time media stack (ICE, DTLS, codecs) is external. The
//! orchestrator drives it through [`MediaEngine`] and [`MediaConnection`],
//! and the engine reports back through typed [`PeerEvent`]s on a channel
//! instead of callbacks, so every transition runs inside the orchestrator
//! actor.

use crate::errors::EngineError;
use crate::media::{LocalTrack, MediaKind};
use crate::signal::{IceCandidate, SessionDescription};
use common::types::ParticipantId;
use tokio::sync::mpsc;

/// Connection state as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        }
    }
}

/// Track received from a remote participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: MediaKind,
    pub stream_id: String,
}

/// Outgoing sender slot on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SenderId(pub u32);

/// One engine connection. Reconnecting to the same remote yields a new
/// generation, so events from a closed connection can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    pub remote_id: ParticipantId,
    pub generation: u64,
}

impl ConnectionId {
    #[must_use]
    pub const fn new(remote_id: ParticipantId, generation: u64) -> Self {
        Self {
            remote_id,
            generation,
        }
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.remote_id, self.generation)
    }
}

/// Events pushed by the engine for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A local candidate was gathered and must be sent to the remote.
    IceCandidate {
        connection: ConnectionId,
        candidate: IceCandidate,
    },
    /// Connection state changed.
    StateChanged {
        connection: ConnectionId,
        state: ConnectionState,
    },
    /// Remote media arrived.
    RemoteTrack {
        connection: ConnectionId,
        track: RemoteTrack,
    },
}

impl PeerEvent {
    #[must_use]
    pub fn connection(&self) -> ConnectionId {
        match self {
            PeerEvent::IceCandidate { connection, .. }
            | PeerEvent::StateChanged { connection, .. }
            | PeerEvent::RemoteTrack { connection, .. } => *connection,
        }
    }

    #[must_use]
    pub fn remote_id(&self) -> ParticipantId {
        self.connection().remote_id
    }
}

/// Factory for peer connections.
#[async_trait::async_trait]
pub trait MediaEngine: Send + Sync {
    /// Create the connection `id`. Engine events for it go to `events`,
    /// tagged with `id`, for as long as the engine produces them.
    async fn create_connection(
        &self,
        id: ConnectionId,
        events: mpsc::Sender<PeerEvent>,
    ) -> Result<Box<dyn MediaConnection>, EngineError>;
}

/// One direct media connection to a remote participant.
#[async_trait::async_trait]
pub trait MediaConnection: Send + Sync {
    async fn add_track(&self, track: &LocalTrack) -> Result<SenderId, EngineError>;

    /// Swap the track of an existing sender in place; `None` sends nothing.
    async fn replace_track(
        &self,
        sender: SenderId,
        track: Option<&LocalTrack>,
    ) -> Result<(), EngineError>;

    async fn create_offer(&self) -> Result<SessionDescription, EngineError>;

    async fn create_answer(&self) -> Result<SessionDescription, EngineError>;

    async fn set_local_description(&self, description: SessionDescription)
        -> Result<(), EngineError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), EngineError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError>;

    /// Release the connection. Idempotent.
    async fn close(&self);
}

/// Mock media engine for testing.
///
/// Records every call in order and lets tests inject engine events.
pub mod mock {
    use super::*;
    use crate::signal::SdpKind;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};

    /// One engine operation.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum EngineCall {
        CreateConnection,
        AddTrack { track_id: String, sender: SenderId },
        ReplaceTrack {
            sender: SenderId,
            track_id: Option<String>,
        },
        CreateOffer,
        CreateAnswer,
        SetLocalDescription(SdpKind),
        SetRemoteDescription(SdpKind),
        AddIceCandidate(String),
        Close,
    }

    /// A call together with the connection it was made on.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct RecordedCall {
        pub remote_id: ParticipantId,
        pub call: EngineCall,
    }

    #[derive(Default)]
    struct MockState {
        calls: Mutex<Vec<RecordedCall>>,
        /// Every connection ever created, in order. Closing keeps the entry
        /// so late events can still be injected the way real engines emit them.
        events: Mutex<Vec<(ConnectionId, mpsc::Sender<PeerEvent>)>>,
        fail_create: AtomicBool,
        fail_negotiation: AtomicBool,
    }

    impl MockState {
        fn record(&self, remote_id: ParticipantId, call: EngineCall) {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(RecordedCall { remote_id, call });
        }
    }

    /// Mock engine. Clones share state.
    #[derive(Clone, Default)]
    pub struct MockMediaEngine {
        state: Arc<MockState>,
    }

    impl MockMediaEngine {
        pub fn new() -> Self {
            Self::default()
        }

        /// Engine whose connections cannot be created.
        pub fn failing_create() -> Self {
            let engine = Self::default();
            engine.state.fail_create.store(true, Ordering::SeqCst);
            engine
        }

        /// Engine whose offer/answer creation fails.
        pub fn failing_negotiation() -> Self {
            let engine = Self::default();
            engine.state.fail_negotiation.store(true, Ordering::SeqCst);
            engine
        }

        /// Every call in order.
        pub fn calls(&self) -> Vec<RecordedCall> {
            self.state
                .calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Calls made on the connection to `remote_id`, in order.
        pub fn calls_for(&self, remote_id: ParticipantId) -> Vec<EngineCall> {
            self.calls()
                .into_iter()
                .filter(|c| c.remote_id == remote_id)
                .map(|c| c.call)
                .collect()
        }

        /// Number of connections created so far.
        pub fn connections_created(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| c.call == EngineCall::CreateConnection)
                .count()
        }

        /// Connections created to `remote_id`, oldest first.
        pub fn connections_to(&self, remote_id: ParticipantId) -> Vec<ConnectionId> {
            self.state
                .events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .map(|(id, _)| *id)
                .filter(|id| id.remote_id == remote_id)
                .collect()
        }

        /// Most recent connection to `remote_id`.
        pub fn latest_connection(&self, remote_id: ParticipantId) -> Option<ConnectionId> {
            self.connections_to(remote_id).last().copied()
        }

        /// Inject an engine event for its connection, closed or not. Returns
        /// false when that connection was never created or its receiver is gone.
        pub async fn emit(&self, event: PeerEvent) -> bool {
            let target = event.connection();
            let sender = self
                .state
                .events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .find(|(id, _)| *id == target)
                .map(|(_, sender)| sender.clone());
            match sender {
                Some(sender) => sender.send(event).await.is_ok(),
                None => false,
            }
        }

        /// Report a state change on the latest connection to `remote_id`.
        pub async fn report_state(&self, remote_id: ParticipantId, state: ConnectionState) -> bool {
            match self.latest_connection(remote_id) {
                Some(connection) => self.report_state_on(connection, state).await,
                None => false,
            }
        }

        /// Report a state change on a specific connection.
        pub async fn report_state_on(&self, connection: ConnectionId, state: ConnectionState) -> bool {
            self.emit(PeerEvent::StateChanged { connection, state }).await
        }

        /// Report a gathered local candidate.
        pub async fn report_candidate(&self, remote_id: ParticipantId, candidate: &str) -> bool {
            let Some(connection) = self.latest_connection(remote_id) else {
                return false;
            };
            self.emit(PeerEvent::IceCandidate {
                connection,
                candidate: IceCandidate {
                    candidate: candidate.to_string(),
                    sdp_mid: Some("0".to_string()),
                    sdp_mline_index: Some(0),
                },
            })
            .await
        }

        /// Report an incoming remote track.
        pub async fn report_track(
            &self,
            remote_id: ParticipantId,
            track_id: &str,
            kind: MediaKind,
        ) -> bool {
            let Some(connection) = self.latest_connection(remote_id) else {
                return false;
            };
            self.emit(PeerEvent::RemoteTrack {
                connection,
                track: RemoteTrack {
                    id: track_id.to_string(),
                    kind,
                    stream_id: format!("stream-{remote_id}"),
                },
            })
            .await
        }
    }

    #[async_trait::async_trait]
    impl MediaEngine for MockMediaEngine {
        async fn create_connection(
            &self,
            id: ConnectionId,
            events: mpsc::Sender<PeerEvent>,
        ) -> Result<Box<dyn MediaConnection>, EngineError> {
            if self.state.fail_create.load(Ordering::SeqCst) {
                return Err(EngineError::Internal("mock create failure".to_string()));
            }
            self.state.record(id.remote_id, EngineCall::CreateConnection);
            self.state
                .events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((id, events));
            Ok(Box::new(MockConnection {
                remote_id: id.remote_id,
                state: Arc::clone(&self.state),
                next_sender: AtomicU32::new(0),
                remote_description_set: AtomicBool::new(false),
            }))
        }
    }

    struct MockConnection {
        remote_id: ParticipantId,
        state: Arc<MockState>,
        next_sender: AtomicU32,
        remote_description_set: AtomicBool,
    }

    impl MockConnection {
        fn negotiation_result(&self) -> Result<(), EngineError> {
            if self.state.fail_negotiation.load(Ordering::SeqCst) {
                Err(EngineError::Negotiation("mock negotiation failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait::async_trait]
    impl MediaConnection for MockConnection {
        async fn add_track(&self, track: &LocalTrack) -> Result<SenderId, EngineError> {
            let sender = SenderId(self.next_sender.fetch_add(1, Ordering::SeqCst));
            self.state.record(
                self.remote_id,
                EngineCall::AddTrack {
                    track_id: track.id.clone(),
                    sender,
                },
            );
            Ok(sender)
        }

        async fn replace_track(
            &self,
            sender: SenderId,
            track: Option<&LocalTrack>,
        ) -> Result<(), EngineError> {
            self.state.record(
                self.remote_id,
                EngineCall::ReplaceTrack {
                    sender,
                    track_id: track.map(|t| t.id.clone()),
                },
            );
            Ok(())
        }

        async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
            self.state.record(self.remote_id, EngineCall::CreateOffer);
            self.negotiation_result()?;
            Ok(SessionDescription::offer(format!(
                "v=0\r\ns=mock-offer-{}\r\n",
                self.remote_id
            )))
        }

        async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
            self.state.record(self.remote_id, EngineCall::CreateAnswer);
            self.negotiation_result()?;
            Ok(SessionDescription::answer(format!(
                "v=0\r\ns=mock-answer-{}\r\n",
                self.remote_id
            )))
        }

        async fn set_local_description(
            &self,
            description: SessionDescription,
        ) -> Result<(), EngineError> {
            self.state
                .record(self.remote_id, EngineCall::SetLocalDescription(description.kind));
            Ok(())
        }

        async fn set_remote_description(
            &self,
            description: SessionDescription,
        ) -> Result<(), EngineError> {
            self.state
                .record(self.remote_id, EngineCall::SetRemoteDescription(description.kind));
            self.remote_description_set.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
            self.state
                .record(self.remote_id, EngineCall::AddIceCandidate(candidate.candidate));
            // Real engines reject candidates that precede the remote description
            if self.remote_description_set.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(EngineError::Candidate(
                    "remote description not set".to_string(),
                ))
            }
        }

        async fn close(&self) {
            self.state.record(self.remote_id, EngineCall::Close);
        }
    }
}
