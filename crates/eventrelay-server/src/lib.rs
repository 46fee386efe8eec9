//! EventRelay server.
//!
//! Room-scoped chat relay over WebSocket. Clients connect with an identity
//! token and a room id, send JSON chat messages, and receive every message
//! accepted in their room, stamped with the server's clock.
//!
//! # Architecture
//!
//! ```text
//! socket ─► Session ──► Storage (best effort)
//!              │
//!              └──► Broadcaster ─► queue ─► BroadcastWorker ─► Registry snapshot
//!                                                                   │
//!                                         outbound queue ◄──────────┘ (per connection)
//!                                              │
//!                                         writer task ─► socket
//! ```
//!
//! # Components
//!
//! - [`TokenVerifier`]: Auth gate; [`JwtVerifier`] in production
//! - [`ConnectionRegistry`]: Live connections, indexed by room
//! - [`Broadcaster`]: Non-blocking publish, single delivery worker
//! - [`SessionFactory`] / [`Session`]: Per-connection state machine
//! - [`Storage`]: Append-only message log ([`MemoryStorage`], [`RedbStorage`])
//! - [`Server`]: Wires the above to an axum WebSocket endpoint
//! - [`SystemEnv`]: Production environment (real time, crypto RNG)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
mod broadcaster;
mod connection;
pub mod env;
mod error;
mod registry;
pub mod session;
pub mod storage;
mod system_env;
pub mod transport;

use std::{net::SocketAddr, sync::Arc, time::Duration};

pub use auth::{AuthError, JwtConfig, JwtKey, JwtVerifier, TokenVerifier};
pub use broadcaster::{BroadcastError, BroadcastWorker, Broadcaster, DeliveryReport, fan_out};
pub use connection::{Connection, ConnectionId, DeliveryError, OutboundQueue};
pub use env::Environment;
pub use error::ServerError;
pub use registry::ConnectionRegistry;
pub use session::{
    CloseReason, ConnectParams, InboundOutcome, Session, SessionConfig, SessionError,
    SessionFactory, SessionState,
};
pub use storage::{ChaoticStorage, MemoryStorage, RedbStorage, Storage, StorageError};
pub use system_env::SystemEnv;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// How long `run` waits for the broadcast worker to drain after shutdown.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:8080")
    pub bind_address: String,
    /// Per-session limits (outbound queue capacity, frame size)
    pub session: SessionConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0:8080".to_string(), session: SessionConfig::default() }
    }
}

/// Production EventRelay server.
///
/// Owns the listener, the registry and the broadcast worker. Build with
/// [`Server::bind`], then drive with [`Server::run`].
pub struct Server<S: Storage, E: Environment = SystemEnv> {
    listener: TcpListener,
    router: axum::Router,
    registry: Arc<ConnectionRegistry>,
    worker: BroadcastWorker,
    storage: S,
    shutdown: CancellationToken,
    _env: std::marker::PhantomData<E>,
}

impl<S: Storage> Server<S, SystemEnv> {
    /// Create and bind a new server using the system clock and RNG.
    pub async fn bind(
        config: ServerRuntimeConfig,
        verifier: Arc<dyn TokenVerifier>,
        storage: S,
    ) -> Result<Self, ServerError> {
        Self::bind_with_env(config, verifier, storage, SystemEnv::new()).await
    }
}

impl<S: Storage, E: Environment> Server<S, E> {
    /// Create and bind a new server with an explicit environment.
    ///
    /// Components are built in dependency order: registry, broadcaster over
    /// the registry, then the session factory over the auth gate, storage and
    /// broadcaster.
    ///
    /// # Errors
    ///
    /// - `ServerError::Config` if the bind address is empty
    /// - `ServerError::Transport` if the address cannot be bound
    pub async fn bind_with_env(
        config: ServerRuntimeConfig,
        verifier: Arc<dyn TokenVerifier>,
        storage: S,
        env: E,
    ) -> Result<Self, ServerError> {
        if config.bind_address.trim().is_empty() {
            return Err(ServerError::Config("bind address is empty".to_string()));
        }

        let listener = TcpListener::bind(config.bind_address.as_str()).await.map_err(|e| {
            ServerError::Transport(format!("failed to bind {}: {e}", config.bind_address))
        })?;

        let registry = Arc::new(ConnectionRegistry::new());
        let (broadcaster, worker) = Broadcaster::new(Arc::clone(&registry));
        let sessions = SessionFactory::new(
            verifier,
            storage.clone(),
            broadcaster,
            Arc::clone(&registry),
            env,
            config.session,
        );

        let shutdown = CancellationToken::new();
        let router = transport::router(sessions, shutdown.clone());

        Ok(Self {
            listener,
            router,
            registry,
            worker,
            storage,
            shutdown,
            _env: std::marker::PhantomData,
        })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Live connection registry.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Storage backend accepted messages are appended to.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Token that stops the server when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the server until the shutdown token is cancelled.
    ///
    /// On shutdown the listener stops accepting, every session closes, and
    /// the broadcast worker drains its queue before this returns.
    pub async fn run(self) -> Result<(), ServerError> {
        let Self { listener, router, worker, shutdown, .. } = self;

        tracing::info!(address = %listener.local_addr()?, "Server listening");

        let worker = tokio::spawn(worker.run());

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .await;

        // Sessions observe the same token; make sure they stop on serve errors too
        shutdown.cancel();

        match tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, worker).await {
            Ok(Ok(())) => tracing::info!("Broadcast worker drained"),
            Ok(Err(e)) => return Err(ServerError::Internal(format!("broadcast worker: {e}"))),
            Err(_) => tracing::warn!("Broadcast worker did not drain before timeout"),
        }

        served.map_err(|e| ServerError::Transport(format!("serve failed: {e}")))?;

        tracing::info!("Server stopped");
        Ok(())
    }
}
