//! Test utilities for the signaling hub.
//!
//! - [`TestHubServer`]: a real hub (actors + WebSocket router) on an
//!   ephemeral port
//! - [`TestWsClient`]: a JSON WebSocket client speaking the hub protocol

pub mod server_harness;
pub mod ws_client;

pub use server_harness::TestHubServer;
pub use ws_client::TestWsClient;
