//! Feed transport abstraction for the receive loop.

use crate::error::EnvError;

/// Abstraction for the blocking, frame-oriented feed transport.
///
/// # Implementations
///
/// - **Production**: ZeroMQ SUB socket connected to the public relay
/// - **Simulation**: In-memory queue of pre-built frames
///
/// # Frame Flow
///
/// ```text
/// Relay                   Receive loop                 Processing loop
///   |                          |                              |
///   |-- compressed frame ----->|                              |
///   |                          |-- decode, send(message) ---->|
///   |                          |                              |-- dispatch
/// ```
///
/// Implementations must poll with a bounded timeout so the receive loop can
/// observe a shutdown request even when the relay is silent.
pub trait FeedSource: Send + 'static {
    /// Receives the next raw frame.
    ///
    /// # Returns
    /// * `Ok(Some(frame))` - A frame was received
    /// * `Ok(None)` - The receive timeout elapsed with no data
    /// * `Err(EnvError::TransportError)` - The transport failed; the caller may retry
    /// * `Err(EnvError::ChannelClosed)` - The source is exhausted and will never yield again
    fn recv_frame(&mut self) -> Result<Option<Vec<u8>>, EnvError>;

    /// Human-readable endpoint description (for logging).
    fn endpoint(&self) -> String;
}
