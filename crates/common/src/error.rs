//! Wire protocol error types.

use thiserror::Error;

/// Errors raised while encoding or decoding transport frames.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame is not a recognised message
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// Frame exceeds the configured size limit
    #[error("Frame too large: {size} bytes (limit {limit})")]
    FrameTooLarge {
        /// Size of the rejected frame
        size: usize,
        /// Configured limit
        limit: usize,
    },

    /// Serialization of an outgoing frame failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias using `ProtocolError`
pub type Result<T> = std::result::Result<T, ProtocolError>;
