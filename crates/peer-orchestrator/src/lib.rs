//! Peer Session Orchestrator
//!
//! Client-side state machine of a Mesh Meeting participant. It joins a
//! session through the signaling hub and keeps one direct media connection
//! ([`link::PeerLink`]) per remote participant.
//!
//! # Architecture
//!
//! ```text
//! HubClient (WebSocket, reconnect)
//!     │ HubEvent                ▲ ClientMessage
//!     ▼                         │
//! PeerOrchestrator actor ──► MediaEngine / MediaConnection (external)
//!     │   ▲ PeerEvent ──────────┘
//!     │   └── intents from OrchestratorHandle
//!     ▼
//! watch<MembershipView>
//! ```
//!
//! The media stack is reached only through the traits in [`engine`]; the
//! `webrtc` feature enables [`webrtc_engine::WebRtcEngine`].

#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod engine;
pub mod errors;
pub mod history;
pub mod link;
pub mod media;
pub mod orchestrator;
pub mod signal;
pub mod view;

#[cfg(feature = "webrtc")]
pub mod webrtc_engine;

pub use client::{ConnectivityStatus, HubChannel, HubClient, HubEvent};
pub use config::OrchestratorConfig;
pub use errors::OrchestratorError;
pub use orchestrator::{OrchestratorHandle, PeerOrchestrator};
pub use view::MembershipView;
