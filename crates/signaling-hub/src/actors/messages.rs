//! Actor mailbox message types.
//!
//! Request/response pairs carry a `respond_to` oneshot; notifications are
//! fire-and-forget.

use crate::errors::HubError;
use common::protocol::{Member, ServerMessage};
use common::types::{ParticipantId, SessionKey};
use tokio::sync::{mpsc, oneshot};

use super::session::SessionActorHandle;

/// Sending half of a connection's writer queue.
///
/// Session actors push frames here directly instead of routing through the
/// connection actor's mailbox.
pub type Outbound = mpsc::Sender<ServerMessage>;

/// Messages handled by the `HubActor`.
pub enum HubMessage {
    /// Join a session, creating it on first join.
    Join {
        session_key: SessionKey,
        participant_id: ParticipantId,
        display_name: String,
        outbound: Outbound,
        respond_to: oneshot::Sender<Result<JoinOutcome, HubError>>,
    },

    /// Leave a session, releasing it when empty.
    Leave {
        session_key: SessionKey,
        participant_id: ParticipantId,
        respond_to: oneshot::Sender<Result<(), HubError>>,
    },

    /// Snapshot of one session.
    GetSession {
        session_key: SessionKey,
        respond_to: oneshot::Sender<Result<SessionState, HubError>>,
    },

    /// Hub-wide status.
    GetStatus {
        respond_to: oneshot::Sender<HubStatus>,
    },

    /// Stop accepting joins and cancel every session.
    Shutdown {
        respond_to: oneshot::Sender<Result<(), HubError>>,
    },
}

/// Messages handled by a `SessionActor`.
pub enum SessionMessage {
    Join {
        participant_id: ParticipantId,
        display_name: String,
        outbound: Outbound,
        respond_to: oneshot::Sender<Result<JoinResult, HubError>>,
    },

    /// Remove a member; replies with the number of members remaining.
    Leave {
        participant_id: ParticipantId,
        respond_to: oneshot::Sender<Result<usize, HubError>>,
    },

    /// Deliver an opaque payload to one member.
    Relay {
        sender_id: ParticipantId,
        recipient_id: ParticipantId,
        payload: String,
    },

    /// Deliver chat text to every other member.
    Chat {
        sender_id: ParticipantId,
        text: String,
    },

    GetState {
        respond_to: oneshot::Sender<Result<SessionState, HubError>>,
    },
}

/// Messages handled by a `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Raw text frame read from the transport.
    Frame { text: String },

    /// Transport closed or errored; leave and stop.
    TransportClosed,
}

/// Reply to a session join.
#[derive(Debug, Clone)]
pub struct JoinResult {
    /// Members in join order, including the joiner.
    pub members: Vec<Member>,
    /// False when the participant was already a member.
    pub newly_joined: bool,
}

/// Reply to a hub join: the session reply plus a handle for relay and chat.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub result: JoinResult,
    pub session: SessionActorHandle,
}

/// Snapshot of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub session_key: SessionKey,
    pub members: Vec<Member>,
}

/// Hub-wide status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStatus {
    pub session_count: usize,
    pub participant_count: usize,
    pub connection_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
}
