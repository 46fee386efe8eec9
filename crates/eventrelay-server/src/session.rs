//! Per-connection session handling.
//!
//! A session walks one client through its whole life:
//!
//! ```text
//! Connecting ──► Authenticating ──► Active ──► Closed
//!      │                │
//!      └────────────────┴──────────────────────► Closed (nothing registered)
//! ```
//!
//! [`SessionFactory::open`] covers the first three states: it validates the
//! connect parameters, asks the [`TokenVerifier`] for the user exactly once,
//! and registers the connection. Only an `Active` [`Session`] exists as a
//! value. Every inbound frame then goes through [`Session::handle_frame`]:
//! decode, check the claimed author against the authenticated one, stamp,
//! persist, publish. [`Session::close`] deregisters the connection; it runs
//! at most once, and again from `Drop` if the transport forgot.
//!
//! The session holds no transport. It is driven by the WebSocket layer in
//! [`crate::transport`] and by tests directly.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use eventrelay_proto::{
    ChatMessage, InboundMessage, MAX_FRAME_BYTES, ProtocolError, RoomId, UserId,
};
use serde::Deserialize;
use thiserror::Error;

use crate::{
    auth::{AuthError, TokenVerifier},
    broadcaster::Broadcaster,
    connection::{Connection, ConnectionId, OutboundQueue},
    env::Environment,
    registry::ConnectionRegistry,
    storage::Storage,
};

/// Default per-connection outbound queue capacity.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport accepted, parameters not yet checked
    Connecting,
    /// Waiting on the token verifier
    Authenticating,
    /// Registered and reading frames
    Active,
    /// Deregistered. Terminal.
    Closed,
}

/// Query parameters supplied on connect.
///
/// `eventID` is accepted as an alias for `roomID`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConnectParams {
    /// Opaque identity credential
    pub token: Option<String>,
    /// Room the connection sends to and receives from
    #[serde(rename = "roomID", alias = "eventID")]
    pub room_id: Option<String>,
}

/// Per-session limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Messages that may wait for the writer before deliveries are dropped
    pub outbound_capacity: usize,
    /// Largest accepted inbound frame, in bytes
    pub max_frame_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { outbound_capacity: DEFAULT_OUTBOUND_CAPACITY, max_frame_bytes: MAX_FRAME_BYTES }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer sent a close frame or the stream ended
    ClientClosed,
    /// Reading from the transport failed
    ReadError,
    /// Peer sent a frame that could not be decoded
    ProtocolViolation,
    /// Writing to the transport failed
    WriteFailed,
    /// Connection was closed elsewhere (broadcast eviction)
    Evicted,
    /// Broadcaster is gone
    BroadcastStopped,
    /// Server is shutting down
    Shutdown,
    /// Session value dropped without an explicit close
    Dropped,
}

impl CloseReason {
    /// Short name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::ReadError => "read_error",
            Self::ProtocolViolation => "protocol_violation",
            Self::WriteFailed => "write_failed",
            Self::Evicted => "evicted",
            Self::BroadcastStopped => "broadcast_stopped",
            Self::Shutdown => "shutdown",
            Self::Dropped => "dropped",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that end a session, or prevent one from starting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Credential missing or not accepted
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// `roomID` missing or invalid
    #[error("invalid room: {0}")]
    InvalidRoom(ProtocolError),

    /// Inbound frame could not be decoded
    #[error("protocol error: {0}")]
    Protocol(ProtocolError),

    /// Connection id collided with a live connection
    #[error("connection {0} already registered")]
    DuplicateConnection(ConnectionId),

    /// Broadcaster no longer accepts messages
    #[error("broadcaster stopped")]
    BroadcastStopped,

    /// Session is already closed
    #[error("session closed")]
    Closed,
}

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Message was stamped and handed to the broadcaster.
    Accepted {
        /// Server-assigned timestamp
        timestamp: DateTime<Utc>,
        /// Position in the room log, `None` if persistence failed
        log_index: Option<u64>,
    },
    /// Claimed author did not match the authenticated user. Nothing was
    /// persisted or published; the connection stays open.
    Rejected {
        /// Author the client claimed
        claimed: UserId,
    },
}

impl InboundOutcome {
    /// Whether the message reached storage.
    pub fn is_persisted(&self) -> bool {
        matches!(self, Self::Accepted { log_index: Some(_), .. })
    }
}

/// Builds sessions. One per server; cheap to clone.
#[derive(Clone)]
pub struct SessionFactory<S: Storage, E: Environment> {
    verifier: Arc<dyn TokenVerifier>,
    storage: S,
    broadcaster: Broadcaster,
    registry: Arc<ConnectionRegistry>,
    env: E,
    config: SessionConfig,
}

impl<S: Storage, E: Environment> SessionFactory<S, E> {
    /// Create a factory over the shared server components.
    pub fn new(
        verifier: Arc<dyn TokenVerifier>,
        storage: S,
        broadcaster: Broadcaster,
        registry: Arc<ConnectionRegistry>,
        env: E,
        config: SessionConfig,
    ) -> Self {
        Self { verifier, storage, broadcaster, registry, env, config }
    }

    /// Session limits in effect.
    pub fn config(&self) -> SessionConfig {
        self.config
    }

    /// Registry sessions register into.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Authenticate and register a new connection.
    ///
    /// On success the returned queue must be drained by the caller's writer.
    /// On any error nothing has been registered.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidRoom` if `roomID` is missing or invalid
    /// - `SessionError::Auth` if the token is missing, does not verify, or
    ///   names no user
    /// - `SessionError::BroadcastStopped` if the server is shutting down
    /// - `SessionError::DuplicateConnection` on an id collision
    pub async fn open(
        &self,
        params: ConnectParams,
    ) -> Result<(Session<S, E>, OutboundQueue), SessionError> {
        let mut state = SessionState::Connecting;

        let raw_room = params.room_id.as_deref().ok_or_else(|| {
            SessionError::InvalidRoom(ProtocolError::InvalidRoomId("missing".into()))
        })?;
        let room_id = RoomId::parse(raw_room).map_err(SessionError::InvalidRoom)?;

        let token =
            params.token.as_deref().filter(|t| !t.is_empty()).ok_or(AuthError::MissingToken)?;

        advance(&mut state, SessionState::Authenticating);
        let user_id = self.verifier.verify(token).await.map_err(|e| {
            tracing::info!(room = %room_id, error = %e, "Connection rejected by auth gate");
            SessionError::Auth(e)
        })?;
        if user_id.is_empty() {
            tracing::warn!(room = %room_id, "Verifier returned an empty user id");
            return Err(SessionError::Auth(AuthError::Rejected("empty user id".into())));
        }

        if !self.broadcaster.is_running() {
            return Err(SessionError::BroadcastStopped);
        }

        let id = ConnectionId(self.env.random_u64());
        let (conn, queue) = Connection::open(id, user_id, room_id, self.config.outbound_capacity);

        if !self.registry.register(Arc::clone(&conn)) {
            tracing::warn!(connection = %id, "Connection id collision");
            return Err(SessionError::DuplicateConnection(id));
        }

        advance(&mut state, SessionState::Active);
        tracing::info!(
            connection = %id,
            user = %conn.user_id(),
            room = %conn.room_id(),
            "Connection registered"
        );

        let session = Session {
            conn,
            storage: self.storage.clone(),
            broadcaster: self.broadcaster.clone(),
            registry: Arc::clone(&self.registry),
            env: self.env.clone(),
            max_frame_bytes: self.config.max_frame_bytes,
            last_timestamp: None,
            state,
        };

        Ok((session, queue))
    }
}

impl<S: Storage, E: Environment> fmt::Debug for SessionFactory<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionFactory").field("config", &self.config).finish_non_exhaustive()
    }
}

fn advance(state: &mut SessionState, next: SessionState) {
    tracing::trace!(from = ?state, to = ?next, "Session state transition");
    *state = next;
}

/// One active, registered client session.
pub struct Session<S: Storage, E: Environment> {
    conn: Arc<Connection>,
    storage: S,
    broadcaster: Broadcaster,
    registry: Arc<ConnectionRegistry>,
    env: E,
    max_frame_bytes: usize,
    last_timestamp: Option<DateTime<Utc>>,
    state: SessionState,
}

impl<S: Storage, E: Environment> Session<S, E> {
    /// Connection identity.
    pub fn id(&self) -> ConnectionId {
        self.conn.id()
    }

    /// Authenticated user.
    pub fn user_id(&self) -> &UserId {
        self.conn.user_id()
    }

    /// Room this session is bound to.
    pub fn room_id(&self) -> &RoomId {
        self.conn.room_id()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Registry handle for this session's connection.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Process one inbound text frame.
    ///
    /// # Errors
    ///
    /// - `SessionError::Protocol` if the frame is oversized or not a message.
    ///   The caller should close the session.
    /// - `SessionError::BroadcastStopped` if the broadcaster is gone
    /// - `SessionError::Closed` if the session or its connection is closed
    pub fn handle_frame(&mut self, raw: &str) -> Result<InboundOutcome, SessionError> {
        if self.state != SessionState::Active || !self.conn.is_live() {
            return Err(SessionError::Closed);
        }

        let inbound = InboundMessage::decode_with_limit(raw, self.max_frame_bytes)
            .map_err(SessionError::Protocol)?;

        if &inbound.user_id != self.conn.user_id() {
            tracing::warn!(
                connection = %self.conn.id(),
                user = %self.conn.user_id(),
                claimed = %inbound.user_id,
                room = %self.conn.room_id(),
                "Dropping message with mismatched author"
            );
            return Ok(InboundOutcome::Rejected { claimed: inbound.user_id });
        }

        let timestamp = self.next_timestamp();
        let message = ChatMessage {
            user_id: inbound.user_id,
            username: inbound.username,
            content: inbound.content,
            timestamp,
            room_id: self.conn.room_id().clone(),
        };

        let log_index = match self.storage.append_message(&message.room_id, &message) {
            Ok(index) => Some(index),
            Err(e) => {
                tracing::error!(
                    connection = %self.conn.id(),
                    room = %message.room_id,
                    error = %e,
                    "Failed to persist message, broadcasting anyway"
                );
                None
            },
        };

        self.broadcaster.publish(message).map_err(|_| SessionError::BroadcastStopped)?;

        tracing::debug!(
            connection = %self.conn.id(),
            room = %self.conn.room_id(),
            ?log_index,
            "Message accepted"
        );

        Ok(InboundOutcome::Accepted { timestamp, log_index })
    }

    /// Wall clock, clamped so timestamps never go backwards on this session.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = self.env.wall_clock();
        let timestamp = match self.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_timestamp = Some(timestamp);
        timestamp
    }

    /// End the session and deregister its connection.
    ///
    /// Returns `true` for the call that moved the session to `Closed`.
    pub fn close(&mut self, reason: CloseReason) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        advance(&mut self.state, SessionState::Closed);

        let deregistered = self.registry.deregister(self.conn.id()).is_some();
        // Already evicted by the broadcaster; make sure the handle is closed
        self.conn.close();

        tracing::info!(
            connection = %self.conn.id(),
            user = %self.conn.user_id(),
            room = %self.conn.room_id(),
            %reason,
            deregistered,
            "Connection closed"
        );
        true
    }
}

impl<S: Storage, E: Environment> Drop for Session<S, E> {
    fn drop(&mut self) {
        self.close(CloseReason::Dropped);
    }
}

impl<S: Storage, E: Environment> fmt::Debug for Session<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("connection", &self.conn)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
