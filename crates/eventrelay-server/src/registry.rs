//! Connection registry for live-set and room membership tracking.
//!
//! The registry maintains two mappings under one lock: connection → handle
//! (identity, teardown) and room → connections (broadcast). Both are updated
//! together on register and deregister, so a connection is either fully
//! present or fully absent.
//!
//! Broadcast never iterates the maps directly. It takes a snapshot (cloned
//! `Arc` handles) and releases the lock before delivering, so slow deliveries
//! do not block registration and a snapshot never exposes a freed resource:
//! a connection removed after the snapshot still exists, it just refuses
//! delivery with [`DeliveryError::Closed`](crate::DeliveryError::Closed).

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use eventrelay_proto::RoomId;
use parking_lot::RwLock;

use crate::connection::{Connection, ConnectionId};

#[derive(Debug, Default)]
struct RegistryInner {
    /// Connection ID → live connection
    connections: HashMap<ConnectionId, Arc<Connection>>,
    /// Room ID → connections bound to that room
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
}

/// Concurrent set of live connections, indexed by room.
///
/// All methods take `&self`; share it as `Arc<ConnectionRegistry>`.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
}

impl ConnectionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to the live set.
    ///
    /// Returns `false` (and changes nothing) if a connection with the same ID
    /// is already registered.
    pub fn register(&self, conn: Arc<Connection>) -> bool {
        let mut inner = self.inner.write();
        let id = conn.id();

        if inner.connections.contains_key(&id) {
            return false;
        }

        inner.rooms.entry(conn.room_id().clone()).or_default().insert(id);
        inner.connections.insert(id, conn);
        true
    }

    /// Remove a connection from the live set and close it.
    ///
    /// Returns the connection if this call removed it. Concurrent or repeated
    /// calls for the same ID get `None`, so exactly one teardown path ever
    /// observes the removal.
    pub fn deregister(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let conn = {
            let mut inner = self.inner.write();
            let conn = inner.connections.remove(&id)?;

            let room = conn.room_id();
            if let Some(members) = inner.rooms.get_mut(room) {
                members.remove(&id);
                if members.is_empty() {
                    inner.rooms.remove(room);
                }
            }
            conn
        };

        conn.close();
        Some(conn)
    }

    /// Whether a connection is currently registered.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.inner.read().connections.contains_key(&id)
    }

    /// All live connections, in no particular order.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.inner.read().connections.values().cloned().collect()
    }

    /// Live connections bound to `room_id`, in no particular order.
    pub fn snapshot_room(&self, room_id: &RoomId) -> Vec<Arc<Connection>> {
        let inner = self.inner.read();
        let Some(members) = inner.rooms.get(room_id) else {
            return Vec::new();
        };

        members.iter().filter_map(|id| inner.connections.get(id).cloned()).collect()
    }

    /// Total number of live connections.
    pub fn connection_count(&self) -> usize {
        self.inner.read().connections.len()
    }

    /// Number of live connections bound to `room_id`.
    pub fn room_connection_count(&self, room_id: &RoomId) -> usize {
        self.inner.read().rooms.get(room_id).map_or(0, HashSet::len)
    }

    /// Rooms with at least one live connection.
    pub fn rooms(&self) -> Vec<RoomId> {
        self.inner.read().rooms.keys().cloned().collect()
    }
}
