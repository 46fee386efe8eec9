//! Live client connections.
//!
//! A [`Connection`] is the registry's handle on one authenticated transport
//! session: who it belongs to, which room it listens to, and a bounded
//! outbound queue drained by the transport's writer task. Delivering to a
//! connection never waits; it either enqueues or fails immediately.
//!
//! Liveness is a flag paired with a [`CancellationToken`]. Closing is
//! idempotent, and the read loop and writer task both await the token, so a
//! close triggered from any side (read error, write error, registry eviction,
//! shutdown) tears down the whole session.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use eventrelay_proto::{ChatMessage, RoomId, UserId};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Receiving half of a connection's outbound queue, owned by the writer task.
pub type OutboundQueue = mpsc::Receiver<Arc<ChatMessage>>;

/// Unique identity of a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Why a delivery to a single connection did not happen.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// Connection is closed or its writer is gone. The connection must be
    /// deregistered.
    #[error("connection {0} is closed")]
    Closed(ConnectionId),

    /// Outbound queue is full. The message is dropped for this connection
    /// only; the connection stays registered.
    #[error("connection {0} outbound queue is full")]
    Backlogged(ConnectionId),
}

/// One authenticated, room-bound client session.
pub struct Connection {
    id: ConnectionId,
    user_id: UserId,
    room_id: RoomId,
    outbound: mpsc::Sender<Arc<ChatMessage>>,
    live: AtomicBool,
    closed: CancellationToken,
}

impl Connection {
    /// Create a connection and the queue its writer task drains.
    ///
    /// `capacity` bounds how many messages may wait for the writer before
    /// further deliveries are dropped. Zero is treated as one.
    pub fn open(
        id: ConnectionId,
        user_id: UserId,
        room_id: RoomId,
        capacity: usize,
    ) -> (Arc<Self>, OutboundQueue) {
        let (outbound, queue) = mpsc::channel(capacity.max(1));
        let conn = Self {
            id,
            user_id,
            room_id,
            outbound,
            live: AtomicBool::new(true),
            closed: CancellationToken::new(),
        };
        (Arc::new(conn), queue)
    }

    /// Connection identity.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// User this connection authenticated as.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Room this connection receives messages for.
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Whether the connection is still eligible for delivery.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Mark the connection closed.
    ///
    /// Returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        if !self.live.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.closed.cancel();
        true
    }

    /// Resolves once the connection has been closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Queue a message for this connection without waiting.
    pub fn deliver(&self, message: &Arc<ChatMessage>) -> Result<(), DeliveryError> {
        if !self.is_live() {
            return Err(DeliveryError::Closed(self.id));
        }

        self.outbound.try_send(Arc::clone(message)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Backlogged(self.id),
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed(self.id),
        })
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("room_id", &self.room_id)
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}
