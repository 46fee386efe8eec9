//! Protocol error types.

use thiserror::Error;

/// Errors produced while decoding or encoding wire frames.
///
/// All variants are fatal for the frame that produced them. The server treats
/// an undecodable inbound frame as a broken peer and closes the connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame exceeds the maximum accepted size
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Size of the rejected frame
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// Frame is not a valid JSON message object
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Room identifier is empty, too long, or contains control characters
    #[error("invalid room id: {0}")]
    InvalidRoomId(String),

    /// Message could not be serialized
    #[error("encode failed: {0}")]
    Encode(String),
}
