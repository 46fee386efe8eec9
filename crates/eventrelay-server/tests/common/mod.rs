//! Shared test fixtures: a seeded environment with a hand-driven clock, a
//! table-driven token verifier, and a harness that wires sessions to a running
//! broadcast worker.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use eventrelay_proto::{ChatMessage, UserId};
use eventrelay_server::{
    AuthError, Broadcaster, ConnectParams, ConnectionRegistry, Environment, OutboundQueue, Session,
    SessionConfig, SessionFactory, Storage, TokenVerifier,
};
use parking_lot::Mutex;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::task::JoinHandle;

/// Deterministic environment. Time only moves when the test moves it.
#[derive(Clone)]
pub struct SimEnv {
    clock: Arc<Mutex<DateTime<Utc>>>,
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl SimEnv {
    pub fn with_seed(seed: u64) -> Self {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap();
        Self {
            clock: Arc::new(Mutex::new(start)),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.clock.lock() += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.clock.lock() = to;
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.clock.lock()
    }
}

impl Environment for SimEnv {
    fn wall_clock(&self) -> DateTime<Utc> {
        self.now()
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().fill_bytes(buffer);
    }
}

/// Accepts tokens from a fixed table and counts calls.
#[derive(Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, UserId>,
    calls: AtomicUsize,
}

impl StaticTokenVerifier {
    pub fn new<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let tokens = entries
            .into_iter()
            .map(|(token, user)| (token.to_string(), UserId::from(user)))
            .collect();
        Self { tokens, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| AuthError::Rejected(format!("unknown token {token}")))
    }
}

/// Default token table: `token-<name>` authenticates as `<name>`.
/// `token-nobody` verifies to an empty user id.
pub fn verifier() -> Arc<StaticTokenVerifier> {
    Arc::new(StaticTokenVerifier::new([
        ("token-alice", "alice"),
        ("token-bob", "bob"),
        ("token-carol", "carol"),
        ("token-nobody", ""),
    ]))
}

pub fn params(token: &str, room: &str) -> ConnectParams {
    ConnectParams { token: Some(token.to_string()), room_id: Some(room.to_string()) }
}

/// Sessions over a live broadcast worker.
pub struct Harness<S: Storage> {
    pub factory: SessionFactory<S, SimEnv>,
    pub registry: Arc<ConnectionRegistry>,
    pub verifier: Arc<StaticTokenVerifier>,
    pub storage: S,
    pub env: SimEnv,
    worker: Option<JoinHandle<()>>,
}

impl<S: Storage> Harness<S> {
    /// Must be called inside a Tokio runtime.
    pub fn new(storage: S) -> Self {
        Self::with_config(storage, SessionConfig::default())
    }

    pub fn with_config(storage: S, config: SessionConfig) -> Self {
        let env = SimEnv::with_seed(7);
        let verifier = verifier();
        let registry = Arc::new(ConnectionRegistry::new());
        let (broadcaster, worker) = Broadcaster::new(Arc::clone(&registry));
        let factory = SessionFactory::new(
            Arc::clone(&verifier) as Arc<dyn TokenVerifier>,
            storage.clone(),
            broadcaster,
            Arc::clone(&registry),
            env.clone(),
            config,
        );

        Self {
            factory,
            registry,
            verifier,
            storage,
            env,
            worker: Some(tokio::spawn(worker.run())),
        }
    }

    pub async fn join(&self, token: &str, room: &str) -> (Session<S, SimEnv>, OutboundQueue) {
        self.factory.open(params(token, room)).await.unwrap()
    }

    /// Drop the factory (the last broadcaster handle outside sessions) and
    /// wait for the worker to drain.
    pub async fn shutdown(mut self) {
        let worker = self.worker.take().unwrap();
        drop(self);
        tokio::time::timeout(Duration::from_secs(5), worker).await.unwrap().unwrap();
    }
}

/// Next message on `queue`, failing the test after one second.
pub async fn recv(queue: &mut OutboundQueue) -> Arc<ChatMessage> {
    tokio::time::timeout(Duration::from_secs(1), queue.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("outbound queue closed")
}

/// Client frame as JSON text.
pub fn frame(user: &str, username: &str, content: &str) -> String {
    serde_json::json!({ "userID": user, "username": username, "content": content }).to_string()
}
