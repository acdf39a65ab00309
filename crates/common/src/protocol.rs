//! Hub <-> client wire protocol.
//!
//! Every transport frame is a JSON object tagged by `type`:
//!
//! ```text
//! client -> hub   join | signal | chat | leave
//! hub -> client   joined | participant-joined | participant-left | signal | chat | error
//! ```
//!
//! The `payload` of a `signal` frame is an opaque string. The hub relays it
//! byte-for-byte and never parses it; only peers agree on its contents.

use crate::error::{ProtocolError, Result};
use crate::types::{ParticipantId, SessionKey};
use serde::{Deserialize, Serialize};

/// Error codes carried by `error` frames.
pub mod error_codes {
    /// Frame could not be understood or failed validation.
    pub const INVALID_REQUEST: i32 = 1;
    /// Operation names a session or membership that does not exist.
    pub const NOT_FOUND: i32 = 4;
    /// Connection already belongs to another session.
    pub const CONFLICT: i32 = 5;
    /// Hub-side failure (details are never sent to clients).
    pub const INTERNAL_ERROR: i32 = 6;
    /// Hub or session is full, or the hub is draining.
    pub const CAPACITY_EXCEEDED: i32 = 7;
}

/// One member of a session as announced by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub participant_id: ParticipantId,
    pub display_name: String,
}

/// Frames sent by a client to the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Join (or re-confirm membership of) a session.
    Join {
        session_key: SessionKey,
        display_name: String,
    },
    /// Relay an opaque negotiation payload to one member of the session.
    Signal {
        recipient_id: ParticipantId,
        payload: String,
    },
    /// Broadcast a chat message to the rest of the session.
    Chat { text: String },
    /// Leave the session without closing the transport.
    Leave,
}

/// Frames pushed by the hub to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Reply to `join`: the caller's id and the full membership in join order.
    Joined {
        participant_id: ParticipantId,
        members: Vec<Member>,
    },
    /// Another participant joined; `members` is the full list in join order.
    ParticipantJoined {
        participant_id: ParticipantId,
        members: Vec<Member>,
    },
    /// A participant left or its transport dropped.
    ParticipantLeft { participant_id: ParticipantId },
    /// Negotiation payload relayed from another member.
    Signal {
        sender_id: ParticipantId,
        payload: String,
    },
    /// Chat message from another member.
    Chat {
        text: String,
        sender_name: String,
        sender_id: ParticipantId,
    },
    /// Request rejected.
    Error { code: i32, message: String },
}

impl ClientMessage {
    /// Decode a text frame, enforcing a size limit before parsing.
    pub fn from_json(text: &str, max_frame_bytes: usize) -> Result<Self> {
        decode(text, max_frame_bytes)
    }

    /// Encode as a text frame.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Bounded label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Join { .. } => "join",
            ClientMessage::Signal { .. } => "signal",
            ClientMessage::Chat { .. } => "chat",
            ClientMessage::Leave => "leave",
        }
    }
}

impl ServerMessage {
    /// Decode a text frame, enforcing a size limit before parsing.
    pub fn from_json(text: &str, max_frame_bytes: usize) -> Result<Self> {
        decode(text, max_frame_bytes)
    }

    /// Encode as a text frame.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Bounded label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Joined { .. } => "joined",
            ServerMessage::ParticipantJoined { .. } => "participant-joined",
            ServerMessage::ParticipantLeft { .. } => "participant-left",
            ServerMessage::Signal { .. } => "signal",
            ServerMessage::Chat { .. } => "chat",
            ServerMessage::Error { .. } => "error",
        }
    }
}

fn decode<T: for<'de> Deserialize<'de>>(text: &str, max_frame_bytes: usize) -> Result<T> {
    if text.len() > max_frame_bytes {
        return Err(ProtocolError::FrameTooLarge {
            size: text.len(),
            limit: max_frame_bytes,
        });
    }
    serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_client_join_frame_shape() {
        let frame = r#"{"type":"join","session_key":"/room1","display_name":"alice"}"#;
        let msg = ClientMessage::from_json(frame, 1024).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Join {
                session_key: SessionKey::new("/room1"),
                display_name: "alice".to_string(),
            }
        );
    }

    #[test]
    fn test_leave_is_a_bare_tag() {
        let msg = ClientMessage::from_json(r#"{"type":"leave"}"#, 1024).unwrap();
        assert_eq!(msg, ClientMessage::Leave);
        assert_eq!(msg.to_json().unwrap(), r#"{"type":"leave"}"#);
    }

    #[test]
    fn test_participant_joined_uses_kebab_case_tag() {
        let id = ParticipantId::new();
        let msg = ServerMessage::ParticipantJoined {
            participant_id: id,
            members: vec![Member {
                participant_id: id,
                display_name: "bob".to_string(),
            }],
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""type":"participant-joined""#));
        assert_eq!(ServerMessage::from_json(&json, 4096).unwrap(), msg);
    }

    #[test]
    fn test_signal_payload_is_kept_verbatim() {
        let payload = r#"{"sdp":{"type":"offer","sdp":"v=0\r\n"}}"#.to_string();
        let msg = ClientMessage::Signal {
            recipient_id: ParticipantId::new(),
            payload: payload.clone(),
        };
        let decoded = ClientMessage::from_json(&msg.to_json().unwrap(), 4096).unwrap();
        assert!(matches!(decoded, ClientMessage::Signal { payload: p, .. } if p == payload));
    }

    #[test]
    fn test_oversized_frame_rejected_before_parsing() {
        let frame = "x".repeat(100);
        let err = ClientMessage::from_json(&frame, 10).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::FrameTooLarge {
                size: 100,
                limit: 10
            }
        ));
    }

    #[test]
    fn test_unknown_type_is_malformed() {
        let err = ClientMessage::from_json(r#"{"type":"teleport"}"#, 1024).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(ClientMessage::Leave.kind(), "leave");
        assert_eq!(
            ServerMessage::ParticipantLeft {
                participant_id: ParticipantId::new()
            }
            .kind(),
            "participant-left"
        );
    }
}
