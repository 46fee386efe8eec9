//! WebSocket transport.
//!
//! Exposes two routes:
//!
//! - `GET /ws?token=<credential>&roomID=<room>`: WebSocket upgrade. The
//!   credential is verified after the upgrade; a refused connection receives
//!   a close frame (1008 for auth and room errors) and is never registered.
//! - `GET /health`: JSON liveness probe with connection and room counts.
//!
//! Each accepted socket is split in two. The read half stays in the upgrade
//! task and feeds [`Session::handle_frame`]. The write half moves to a writer
//! task that drains the connection's outbound queue; a failed write
//! deregisters the connection, which in turn stops the read loop.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
    routing::get,
};
use eventrelay_proto::ProtocolError;
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    connection::{Connection, OutboundQueue},
    env::Environment,
    registry::ConnectionRegistry,
    session::{CloseReason, ConnectParams, Session, SessionError, SessionFactory},
    storage::Storage,
};

/// Normal closure.
const CLOSE_NORMAL: u16 = 1000;
/// Server going away (shutdown).
const CLOSE_GOING_AWAY: u16 = 1001;
/// Frame was not valid UTF-8 or not a message.
const CLOSE_INVALID_PAYLOAD: u16 = 1007;
/// Auth or room policy violation.
const CLOSE_POLICY: u16 = 1008;
/// Frame exceeded the size limit.
const CLOSE_TOO_BIG: u16 = 1009;
/// Server could not serve the connection.
const CLOSE_INTERNAL: u16 = 1011;

/// Shared state handed to every request handler.
struct AppState<S: Storage, E: Environment> {
    sessions: SessionFactory<S, E>,
    shutdown: CancellationToken,
}

impl<S: Storage, E: Environment> Clone for AppState<S, E> {
    fn clone(&self) -> Self {
        Self { sessions: self.sessions.clone(), shutdown: self.shutdown.clone() }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    connections: usize,
    rooms: usize,
}

/// Build the HTTP router.
///
/// Sessions observe `shutdown` and close when it is cancelled.
pub fn router<S: Storage, E: Environment>(
    sessions: SessionFactory<S, E>,
    shutdown: CancellationToken,
) -> Router {
    let state = AppState { sessions, shutdown };

    Router::new()
        .route("/ws", get(ws_handler::<S, E>))
        .route("/health", get(health_handler::<S, E>))
        .with_state(state)
}

async fn ws_handler<S: Storage, E: Environment>(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState<S, E>>,
) -> Response {
    let max_frame_bytes = state.sessions.config().max_frame_bytes;

    ws.max_message_size(max_frame_bytes)
        .on_upgrade(move |socket| handle_socket(socket, params, state))
}

async fn health_handler<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
) -> impl IntoResponse {
    let registry = state.sessions.registry();

    Json(HealthResponse {
        status: "ok",
        connections: registry.connection_count(),
        rooms: registry.rooms().len(),
    })
}

/// Drive one upgraded socket from authentication to teardown.
async fn handle_socket<S: Storage, E: Environment>(
    socket: WebSocket,
    params: ConnectParams,
    state: AppState<S, E>,
) {
    let (mut sink, mut stream) = socket.split();

    let (mut session, queue) = match state.sessions.open(params).await {
        Ok(opened) => opened,
        Err(e) => {
            tracing::info!(error = %e, "Refusing connection");
            let frame = CloseFrame { code: close_code(&e), reason: close_text(&e).into() };
            let _ = sink.send(Message::Close(Some(frame))).await;
            return;
        },
    };

    let conn = Arc::clone(session.connection());
    let writer = tokio::spawn(write_loop(
        sink,
        queue,
        Arc::clone(&conn),
        Arc::clone(state.sessions.registry()),
        state.shutdown.clone(),
    ));

    let reason = read_loop(&mut session, &mut stream, &conn, &state.shutdown).await;
    session.close(reason);
    drop(session);

    if let Err(e) = writer.await {
        tracing::error!(connection = %conn.id(), error = %e, "Writer task failed");
    }
}

/// Read frames until the peer leaves, the connection is closed elsewhere, or
/// the server shuts down.
async fn read_loop<S: Storage, E: Environment>(
    session: &mut Session<S, E>,
    stream: &mut SplitStream<WebSocket>,
    conn: &Connection,
    shutdown: &CancellationToken,
) -> CloseReason {
    loop {
        let frame = tokio::select! {
            () = shutdown.cancelled() => return CloseReason::Shutdown,
            () = conn.closed() => return CloseReason::Evicted,
            frame = stream.next() => frame,
        };

        let result = match frame {
            None | Some(Ok(Message::Close(_))) => return CloseReason::ClientClosed,
            Some(Err(e)) => {
                tracing::debug!(connection = %conn.id(), error = %e, "Read failed");
                return CloseReason::ReadError;
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Text(text))) => session.handle_frame(text.as_str()),
            Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                Ok(text) => session.handle_frame(text),
                Err(_) => {
                    tracing::warn!(connection = %conn.id(), "Binary frame is not UTF-8");
                    return CloseReason::ProtocolViolation;
                },
            },
        };

        match result {
            Ok(_) => {},
            Err(SessionError::Protocol(e)) => {
                tracing::warn!(connection = %conn.id(), error = %e, "Closing on malformed frame");
                return CloseReason::ProtocolViolation;
            },
            Err(SessionError::BroadcastStopped) => return CloseReason::BroadcastStopped,
            Err(_) => return CloseReason::Evicted,
        }
    }
}

/// Drain the outbound queue into the socket until the connection closes.
///
/// Sessions ended by server shutdown get a 1001 close frame.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut queue: OutboundQueue,
    conn: Arc<Connection>,
    registry: Arc<ConnectionRegistry>,
    shutdown: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            () = conn.closed() => break,
            next = queue.recv() => match next {
                Some(message) => message,
                None => break,
            },
        };

        let frame = match message.encode_wire() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(connection = %conn.id(), error = %e, "Failed to encode message");
                continue;
            },
        };

        if let Err(e) = sink.send(Message::Text(frame.into())).await {
            tracing::debug!(connection = %conn.id(), error = %e, "Write failed, deregistering");
            registry.deregister(conn.id());
            return;
        }
    }

    if shutdown.is_cancelled() {
        let _ = sink.send(Message::Close(Some(shutdown_frame()))).await;
    }
    let _ = sink.close().await;
}

fn shutdown_frame() -> CloseFrame {
    CloseFrame { code: CLOSE_GOING_AWAY, reason: "server shutting down".into() }
}

fn close_code(error: &SessionError) -> u16 {
    match error {
        SessionError::Auth(_) | SessionError::InvalidRoom(_) => CLOSE_POLICY,
        SessionError::Protocol(ProtocolError::FrameTooLarge { .. }) => CLOSE_TOO_BIG,
        SessionError::Protocol(_) => CLOSE_INVALID_PAYLOAD,
        SessionError::BroadcastStopped => CLOSE_GOING_AWAY,
        SessionError::DuplicateConnection(_) => CLOSE_INTERNAL,
        SessionError::Closed => CLOSE_NORMAL,
    }
}

/// Close frame reason. Kept short; the limit is 123 bytes.
fn close_text(error: &SessionError) -> &'static str {
    match error {
        SessionError::Auth(_) => "authentication failed",
        SessionError::InvalidRoom(_) => "invalid room",
        SessionError::Protocol(_) => "protocol error",
        SessionError::BroadcastStopped => "server shutting down",
        SessionError::DuplicateConnection(_) => "internal error",
        SessionError::Closed => "closed",
    }
}
