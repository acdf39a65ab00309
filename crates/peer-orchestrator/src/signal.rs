//! Negotiation payloads carried inside hub `signal` frames.
//!
//! The hub relays these as opaque strings; only peers parse them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Offer or answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpKind::Offer => f.write_str("offer"),
            SdpKind::Answer => f.write_str("answer"),
        }
    }
}

/// Session description produced or consumed by the media engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    #[must_use]
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Trickled ICE candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
}

/// Payload of one `signal` frame: `{"sdp": {...}}` or `{"ice": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalPayload {
    #[serde(rename = "sdp")]
    Sdp(SessionDescription),
    #[serde(rename = "ice")]
    Ice(IceCandidate),
}

impl SignalPayload {
    /// Encode for the hub's opaque `payload` field.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a payload relayed by the hub.
    pub fn decode(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// Bounded label for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SignalPayload::Sdp(SessionDescription {
                kind: SdpKind::Offer,
                ..
            }) => "offer",
            SignalPayload::Sdp(SessionDescription {
                kind: SdpKind::Answer,
                ..
            }) => "answer",
            SignalPayload::Ice(_) => "candidate",
        }
    }
}
