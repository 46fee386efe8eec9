//! Persistence sink for accepted messages.
//!
//! Every accepted message is appended to its room's log before it is handed to
//! the broadcaster. The append is best effort from the session's point of
//! view: a failure is logged and the message is still broadcast.
//!
//! The trait is synchronous and sessions call it inline on their connection
//! task. Appends are small single-record writes, but a durable backend such
//! as [`RedbStorage`] holds the worker thread until its write transaction
//! commits, so other tasks scheduled on that thread wait behind it. Run the
//! server on the multi-threaded runtime when using a durable backend.

mod chaotic;
mod error;
mod memory;
mod redb;

pub use chaotic::ChaoticStorage;
pub use error::StorageError;
use eventrelay_proto::{ChatMessage, RoomId};
pub use memory::MemoryStorage;

pub use self::redb::RedbStorage;

/// Append-only, room-keyed message log.
///
/// Must be Clone (shared by every session), Send + Sync (thread-safe), and
/// synchronous. Implementations typically share internal state via Arc, so
/// clones access the same underlying storage.
pub trait Storage: Clone + Send + Sync + 'static {
    /// Append a message to `room_id`'s log.
    ///
    /// # Invariants
    ///
    /// - Post: the message is stored at the returned index, which equals the
    ///   number of messages previously stored for the room
    /// - A failed append stores nothing
    fn append_message(&self, room_id: &RoomId, message: &ChatMessage)
    -> Result<u64, StorageError>;

    /// Latest log index for a room. `None` if no messages stored.
    fn latest_log_index(&self, room_id: &RoomId) -> Result<Option<u64>, StorageError>;

    /// Load messages from a room's log.
    ///
    /// Returns messages in range `[from, from+limit)`. If fewer than `limit`
    /// messages exist, returns all available messages.
    fn load_messages(
        &self,
        room_id: &RoomId,
        from: u64,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StorageError>;

    /// List all rooms with at least one stored message. Order is not
    /// guaranteed.
    fn list_rooms(&self) -> Result<Vec<RoomId>, StorageError>;
}
