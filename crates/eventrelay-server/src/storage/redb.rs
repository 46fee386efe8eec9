//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety. Every
//! append is its own committed transaction, so an acknowledged append
//! survives a restart.

use std::{path::Path, sync::Arc};

use eventrelay_proto::{ChatMessage, RoomId};
use redb::{Database, ReadableTable, TableDefinition};

use super::{Storage, StorageError};

/// Table: messages
/// Key: [room_len: u16 BE][room bytes][log_index: u64 BE]
/// Value: CBOR-encoded ChatMessage
const MESSAGES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("messages");

/// Table: rooms
/// Key: room bytes (UTF-8)
/// Value: number of messages stored for the room
const ROOMS: TableDefinition<&[u8], u64> = TableDefinition::new("rooms");

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates tables if they don't exist (MESSAGES, ROOMS).
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(|e| StorageError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let _ = txn.open_table(MESSAGES).map_err(|e| StorageError::Io(e.to_string()))?;
            let _ = txn.open_table(ROOMS).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Number of messages stored for a room (0 if unknown).
    fn message_count<T: ReadableTable<&'static [u8], u64>>(
        table: &T,
        room_id: &RoomId,
    ) -> Result<Option<u64>, StorageError> {
        let count = table
            .get(room_id.as_str().as_bytes())
            .map_err(|e| StorageError::Io(e.to_string()))?
            .map(|v| v.value());

        Ok(count)
    }
}

impl Storage for RedbStorage {
    fn append_message(
        &self,
        room_id: &RoomId,
        message: &ChatMessage,
    ) -> Result<u64, StorageError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(message, &mut bytes)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        let log_index = {
            let mut rooms = txn.open_table(ROOMS).map_err(|e| StorageError::Io(e.to_string()))?;
            let mut messages =
                txn.open_table(MESSAGES).map_err(|e| StorageError::Io(e.to_string()))?;

            let log_index = Self::message_count(&rooms, room_id)?.unwrap_or(0);

            let key = encode_message_key(room_id, log_index);
            messages
                .insert(key.as_slice(), bytes.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?;
            rooms
                .insert(room_id.as_str().as_bytes(), log_index + 1)
                .map_err(|e| StorageError::Io(e.to_string()))?;

            log_index
        };

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(log_index)
    }

    fn latest_log_index(&self, room_id: &RoomId) -> Result<Option<u64>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let rooms = txn.open_table(ROOMS).map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(Self::message_count(&rooms, room_id)?.and_then(|count| count.checked_sub(1)))
    }

    fn load_messages(
        &self,
        room_id: &RoomId,
        from: u64,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;

        let rooms = txn.open_table(ROOMS).map_err(|e| StorageError::Io(e.to_string()))?;
        if Self::message_count(&rooms, room_id)?.is_none() {
            return Err(StorageError::NotFound { room_id: room_id.clone() });
        }

        let table = txn.open_table(MESSAGES).map_err(|e| StorageError::Io(e.to_string()))?;

        let start_key = encode_message_key(room_id, from);
        let end_key = encode_message_key(room_id, u64::MAX);

        let results = table
            .range(start_key.as_slice()..=end_key.as_slice())
            .map_err(|e| StorageError::Io(e.to_string()))?;

        let mut messages = Vec::with_capacity(limit.min(1024));
        for result in results {
            if messages.len() >= limit {
                break;
            }

            let (_, value) = result.map_err(|e| StorageError::Io(e.to_string()))?;
            let message: ChatMessage = ciborium::from_reader(value.value())
                .map_err(|e| StorageError::Serialization(e.to_string()))?;

            messages.push(message);
        }

        Ok(messages)
    }

    fn list_rooms(&self) -> Result<Vec<RoomId>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;

        let table = txn.open_table(ROOMS).map_err(|e| StorageError::Io(e.to_string()))?;

        let mut rooms = Vec::new();

        for result in table.iter().map_err(|e| StorageError::Io(e.to_string()))? {
            let (key, _) = result.map_err(|e| StorageError::Io(e.to_string()))?;
            let raw = std::str::from_utf8(key.value())
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            let room_id =
                RoomId::parse(raw).map_err(|e| StorageError::Serialization(e.to_string()))?;
            rooms.push(room_id);
        }

        Ok(rooms)
    }
}

/// Encode a message key. Rooms are length-prefixed so every key for one room
/// is contiguous and ordered by log index.
fn encode_message_key(room_id: &RoomId, log_index: u64) -> Vec<u8> {
    let room = room_id.as_str().as_bytes();
    debug_assert!(room.len() <= usize::from(u16::MAX));

    let mut key = Vec::with_capacity(2 + room.len() + 8);
    key.extend_from_slice(&(room.len() as u16).to_be_bytes());
    key.extend_from_slice(room);
    key.extend_from_slice(&log_index.to_be_bytes());
    key
}
