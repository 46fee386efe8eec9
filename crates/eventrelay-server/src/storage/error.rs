//! Storage error types.
//!
//! - `NotFound`: Requested room has no log
//! - `Serialization`: Failed to encode/decode a stored message
//! - `Io`: Underlying storage system errors

use eventrelay_proto::RoomId;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Room has no stored messages
    #[error("room not found: {room_id}")]
    NotFound {
        /// Room that was not found
        room_id: RoomId,
    },

    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error (file system, database, etc.)
    #[error("I/O error: {0}")]
    Io(String),
}
