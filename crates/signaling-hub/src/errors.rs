//! Signaling hub error types.
//!
//! Error types map to the wire `error` frame codes (`common::protocol::error_codes`).
//! Internal details are logged server-side but not exposed to clients.

use common::error::ProtocolError;
use common::protocol::error_codes;
use thiserror::Error;

/// Signaling hub error type.
///
/// Maps to wire error codes:
/// - `InvalidRequest`, `Protocol`: `INVALID_REQUEST` (1)
/// - `NotJoined`, `SessionNotFound`: `NOT_FOUND` (4)
/// - `Conflict`: `CONFLICT` (5)
/// - `Store`, `Config`, `Internal`: `INTERNAL_ERROR` (6)
/// - `SessionCapacityExceeded`, `HubCapacityExceeded`, `Draining`: `CAPACITY_EXCEEDED` (7)
#[derive(Debug, Error)]
pub enum HubError {
    /// Frame failed validation (oversize field, blank key, ...).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Frame could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Signal, chat or leave sent before joining a session.
    #[error("Not joined to a session")]
    NotJoined,

    /// No live session under the given key.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Connection already belongs to another session.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Session has reached its participant limit.
    #[error("Session at capacity: {0}")]
    SessionCapacityExceeded(String),

    /// Hub has reached its session limit.
    #[error("Hub at capacity")]
    HubCapacityExceeded,

    /// Hub is shutting down.
    #[error("Hub is draining")]
    Draining,

    /// Session store operation failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (channel failures, actor gone).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HubError {
    /// Returns the wire error code for this error.
    pub fn error_code(&self) -> i32 {
        match self {
            HubError::InvalidRequest(_) | HubError::Protocol(_) => error_codes::INVALID_REQUEST,
            HubError::NotJoined | HubError::SessionNotFound(_) => error_codes::NOT_FOUND,
            HubError::Conflict(_) => error_codes::CONFLICT,
            HubError::Store(_) | HubError::Config(_) | HubError::Internal(_) => {
                error_codes::INTERNAL_ERROR
            }
            HubError::SessionCapacityExceeded(_)
            | HubError::HubCapacityExceeded
            | HubError::Draining => error_codes::CAPACITY_EXCEEDED,
        }
    }

    /// Returns a client-safe error message (no internal details).
    pub fn client_message(&self) -> String {
        match self {
            HubError::Store(_) | HubError::Config(_) | HubError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            HubError::Protocol(ProtocolError::FrameTooLarge { limit, .. }) => {
                format!("Frame exceeds {limit} bytes")
            }
            HubError::Protocol(_) => "Malformed message".to_string(),
            HubError::NotJoined => "Join a session first".to_string(),
            HubError::SessionNotFound(_) => "Session not found".to_string(),
            HubError::SessionCapacityExceeded(_) => "Session is at capacity".to_string(),
            HubError::HubCapacityExceeded => "Server is at capacity, please try again".to_string(),
            HubError::Draining => "Server is shutting down, please reconnect".to_string(),
            HubError::InvalidRequest(msg) | HubError::Conflict(msg) => msg.clone(),
        }
    }
}
