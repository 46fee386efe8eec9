//! Room-scoped broadcast fan-out.
//!
//! Accepting a message and delivering it are decoupled by a FIFO queue. A
//! session hands a validated message to [`Broadcaster::publish`], which only
//! enqueues. A single [`BroadcastWorker`] task drains the queue and fans each
//! message out to the connections in its room.
//!
//! # Ordering
//!
//! One queue, one consumer, and a FIFO outbound queue per connection: messages
//! read from the same connection reach every recipient in read order. No order
//! is promised across connections or rooms.
//!
//! # Failure isolation
//!
//! Each recipient is attempted independently. A closed recipient is
//! deregistered; a backlogged one misses this message. Neither affects the
//! other recipients or the publisher.

use std::sync::Arc;

use eventrelay_proto::ChatMessage;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{
    connection::{ConnectionId, DeliveryError},
    registry::ConnectionRegistry,
};

/// Errors returned to publishers.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastError {
    /// The delivery worker has stopped; nothing can be published
    #[error("broadcast worker stopped")]
    Stopped,
}

/// Outcome of fanning one message out to its room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Connections the message was queued for
    pub delivered: usize,
    /// Connections whose outbound queue was full
    pub dropped: usize,
    /// Connections found closed and deregistered during this fan-out
    pub evicted: Vec<ConnectionId>,
}

/// Publishing handle. Cheap to clone; one per session.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    queue: mpsc::UnboundedSender<Arc<ChatMessage>>,
}

/// The single consumer that performs deliveries.
///
/// Runs until every [`Broadcaster`] handle is dropped and the queue is
/// drained.
#[derive(Debug)]
pub struct BroadcastWorker {
    queue: mpsc::UnboundedReceiver<Arc<ChatMessage>>,
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    /// Create a publishing handle and the worker that serves it.
    pub fn new(registry: Arc<ConnectionRegistry>) -> (Self, BroadcastWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { queue: tx }, BroadcastWorker { queue: rx, registry })
    }

    /// Queue `message` for delivery to every live connection in its room.
    ///
    /// Never waits for delivery.
    pub fn publish(&self, message: ChatMessage) -> Result<(), BroadcastError> {
        self.queue.send(Arc::new(message)).map_err(|_| BroadcastError::Stopped)
    }

    /// Whether the worker is still accepting messages.
    pub fn is_running(&self) -> bool {
        !self.queue.is_closed()
    }
}

impl BroadcastWorker {
    /// Drain the queue, delivering each message in arrival order.
    pub async fn run(mut self) {
        tracing::debug!("Broadcast worker started");

        while let Some(message) = self.queue.recv().await {
            let report = fan_out(&self.registry, &message);
            tracing::trace!(
                room = %message.room_id,
                delivered = report.delivered,
                dropped = report.dropped,
                evicted = report.evicted.len(),
                "Message fanned out"
            );
        }

        tracing::debug!("Broadcast worker stopped");
    }
}

/// Deliver `message` to every live connection in its room.
///
/// Takes a room snapshot, then attempts each connection independently.
/// Always completes for the full snapshot.
pub fn fan_out(registry: &ConnectionRegistry, message: &Arc<ChatMessage>) -> DeliveryReport {
    let mut report = DeliveryReport::default();

    for conn in registry.snapshot_room(&message.room_id) {
        debug_assert_eq!(conn.room_id(), &message.room_id);

        match conn.deliver(message) {
            Ok(()) => report.delivered += 1,
            Err(DeliveryError::Backlogged(id)) => {
                tracing::warn!(
                    connection = %id,
                    room = %message.room_id,
                    "Outbound queue full, dropping message"
                );
                report.dropped += 1;
            },
            Err(DeliveryError::Closed(id)) => {
                if registry.deregister(id).is_some() {
                    tracing::debug!(connection = %id, "Evicted closed connection during broadcast");
                    report.evicted.push(id);
                }
            },
        }
    }

    report
}
