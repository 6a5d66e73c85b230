//! Error types for the tracker environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Feed transport failed (socket error, relay unreachable, etc.)
    #[error("Transport error: {0}")]
    TransportError(String),

    /// A channel between the receive loop and the processing loop closed
    #[error("Channel closed: {0}")]
    ChannelClosed(String),
}

impl EnvError {
    /// Creates a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::TransportError(msg.into())
    }

    /// Creates a channel-closed error.
    pub fn closed(what: impl std::fmt::Display) -> Self {
        Self::ChannelClosed(what.to_string())
    }
}
