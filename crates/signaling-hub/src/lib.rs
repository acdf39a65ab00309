//! Mesh Meeting Signaling Hub
//!
//! Tracks which participants are in which session and relays the messages
//! peers cannot exchange on their own:
//!
//! - membership changes (`joined`, `participant-joined`, `participant-left`)
//! - opaque negotiation payloads (`signal`), never parsed by the hub
//! - chat text, delivered to every other member and never stored
//!
//! Media never passes through the hub.
//!
//! # Architecture
//!
//! ```text
//! HubActor (singleton)
//! └── SessionActor (one per session key)
//!
//! WebSocket ── ConnectionActor (one per socket) ── writer task
//! ```
//!
//! # Modules
//!
//! - [`actors`] - hub, session and connection actors
//! - [`config`] - configuration from environment
//! - [`errors`] - error types mapped to wire error codes
//! - [`observability`] - health endpoints and Prometheus metrics
//! - [`store`] - session membership storage
//! - [`transport`] - WebSocket endpoint

#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

pub mod actors;
pub mod config;
pub mod errors;
pub mod observability;
pub mod store;
pub mod transport;
