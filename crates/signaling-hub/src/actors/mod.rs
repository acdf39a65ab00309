//! Actor hierarchy of the signaling hub.
//!
//! ```text
//! HubActor (singleton)
//! └── supervises N SessionActors (one per live session key)
//!
//! ConnectionActor (one per WebSocket)
//! ├── routes join/leave through the HubActor
//! └── routes signal/chat straight to its SessionActor
//! ```
//!
//! Session actors write to each member's [`messages::Outbound`] queue; a
//! per-connection writer task drains it onto the socket.

pub mod connection;
pub mod hub;
pub mod messages;
pub mod metrics;
pub mod session;

pub use connection::{ConnectionActor, ConnectionActorHandle};
pub use hub::HubActorHandle;
pub use messages::{HubStatus, JoinOutcome, JoinResult, Outbound, SessionState};
pub use metrics::{ActorType, HubMetrics, HubMetricsSnapshot, MailboxMonitor};
pub use session::{SessionActor, SessionActorHandle};
