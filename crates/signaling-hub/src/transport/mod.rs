//! Client-facing transports.

pub mod ws;

pub use ws::{ws_router, WsState};
