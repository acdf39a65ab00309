//! Peer orchestrator error types.
//!
//! Capture and negotiation failures are contained: capture degrades, a
//! failed negotiation closes one `PeerLink`. Only intents the caller issued
//! (toggle, chat, leave) surface an [`OrchestratorError`].

use common::error::ProtocolError;
use thiserror::Error;

/// Errors returned to the presentation layer.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Media engine rejected an operation.
    #[error("Media engine error: {0}")]
    Engine(#[from] EngineError),

    /// Capture device could not be opened.
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    /// Hub channel is unavailable.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Intent needs a session membership the orchestrator does not have yet.
    #[error("Not joined to a session")]
    NotJoined,

    /// Teardown has started; no further intents are accepted.
    #[error("Orchestrator is shutting down")]
    ShuttingDown,

    /// Actor channel failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures reported by a [`crate::engine::MediaEngine`] or one of its connections.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Offer/answer or description handling failed.
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// Candidate could not be applied.
    #[error("Candidate rejected: {0}")]
    Candidate(String),

    /// Track attach/replace failed.
    #[error("Track operation failed: {0}")]
    Track(String),

    /// Connection already closed.
    #[error("Connection closed")]
    Closed,

    /// Engine-side failure.
    #[error("Engine failure: {0}")]
    Internal(String),
}

/// Failures opening capture devices.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// The host refused access.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No such device, or it is busy.
    #[error("Device unavailable: {0}")]
    Unavailable(String),
}

/// Hub connection failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not establish the WebSocket.
    #[error("Connect failed: {0}")]
    Connect(String),

    /// Connection closed by the hub or the network.
    #[error("Connection closed")]
    Closed,

    /// Frame could not be encoded or decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Outbound queue is gone.
    #[error("Send failed: {0}")]
    Send(String),
}

/// Failures of a [`crate::history::SessionHistory`] backend.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("History storage error: {0}")]
    Storage(String),
}
