use std::{collections::HashMap, sync::Arc};

use eventrelay_proto::{ChatMessage, RoomId};
use parking_lot::Mutex;

use super::{Storage, StorageError};

/// In-memory storage implementation for tests and development
///
/// Uses `HashMap` for room lookup and Vec for ordered message storage. All
/// state is wrapped in Arc<Mutex<>> to allow Clone and concurrent access.
/// Everything is lost when the process exits. All operations are O(1) except
/// `load_messages` which is O(limit).
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<HashMap<RoomId, Vec<ChatMessage>>>>,
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rooms with stored messages.
    pub fn room_count(&self) -> usize {
        self.inner.lock().len()
    }

    /// Total number of messages across all rooms.
    pub fn total_message_count(&self) -> usize {
        self.inner.lock().values().map(Vec::len).sum()
    }
}

impl Storage for MemoryStorage {
    fn append_message(
        &self,
        room_id: &RoomId,
        message: &ChatMessage,
    ) -> Result<u64, StorageError> {
        let mut rooms = self.inner.lock();
        let log = rooms.entry(room_id.clone()).or_default();

        let log_index = log.len() as u64;
        log.push(message.clone());

        Ok(log_index)
    }

    fn latest_log_index(&self, room_id: &RoomId) -> Result<Option<u64>, StorageError> {
        let rooms = self.inner.lock();

        Ok(rooms.get(room_id).and_then(|log| log.len().checked_sub(1)).map(|i| i as u64))
    }

    fn load_messages(
        &self,
        room_id: &RoomId,
        from: u64,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StorageError> {
        let rooms = self.inner.lock();

        let log = rooms
            .get(room_id)
            .ok_or_else(|| StorageError::NotFound { room_id: room_id.clone() })?;

        let start = from as usize;
        if start > log.len() {
            return Ok(Vec::new());
        }
        let end = start.saturating_add(limit).min(log.len());

        Ok(log[start..end].to_vec())
    }

    fn list_rooms(&self) -> Result<Vec<RoomId>, StorageError> {
        Ok(self.inner.lock().keys().cloned().collect())
    }
}
