//! Common types shared by the Mesh Meeting signaling hub and peer orchestrator.

#![warn(clippy::pedantic)]

/// Module for protocol error types
pub mod error;

/// Module for identifiers (participants, sessions)
pub mod types;

/// Module for the hub <-> client wire protocol
pub mod protocol;
