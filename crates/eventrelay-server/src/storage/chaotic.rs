//! Chaotic storage wrapper for fault injection testing
//!
//! Storage wrapper that randomly fails operations so tests can check that a
//! persistence failure never stops a message from being broadcast.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use eventrelay_proto::{ChatMessage, RoomId};
use parking_lot::Mutex;

use super::{Storage, StorageError};

/// Chaotic storage wrapper that randomly injects failures
///
/// Delegates to an underlying storage implementation but fails operations
/// based on a configured failure rate. A failed operation never reaches the
/// inner storage, so a failed append stores nothing.
#[derive(Clone)]
pub struct ChaoticStorage<S: Storage> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    /// RNG state for deterministic chaos
    rng: Arc<Mutex<ChaoticRng>>,
    operation_count: Arc<AtomicUsize>,
}

/// Linear congruential generator. Same seed, same failure sequence.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // Numerical Recipes constants
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }
}

impl<S: Storage> ChaoticStorage<S> {
    /// Create a new chaotic storage wrapper with a fixed default seed.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Create with explicit seed for reproducible chaos
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operation_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Underlying storage (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of storage operations attempted, failed or not.
    pub fn operation_count(&self) -> usize {
        self.operation_count.load(Ordering::Relaxed)
    }

    /// Count the operation and decide whether it fails.
    fn inject(&self) -> Result<(), StorageError> {
        self.operation_count.fetch_add(1, Ordering::Relaxed);

        if self.rng.lock().next() < self.failure_rate {
            return Err(StorageError::Io("chaotic failure injection".to_string()));
        }
        Ok(())
    }
}

impl<S: Storage> Storage for ChaoticStorage<S> {
    fn append_message(
        &self,
        room_id: &RoomId,
        message: &ChatMessage,
    ) -> Result<u64, StorageError> {
        self.inject()?;
        self.inner.append_message(room_id, message)
    }

    fn latest_log_index(&self, room_id: &RoomId) -> Result<Option<u64>, StorageError> {
        self.inject()?;
        self.inner.latest_log_index(room_id)
    }

    fn load_messages(
        &self,
        room_id: &RoomId,
        from: u64,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StorageError> {
        self.inject()?;
        self.inner.load_messages(room_id, from, limit)
    }

    fn list_rooms(&self) -> Result<Vec<RoomId>, StorageError> {
        self.inject()?;
        self.inner.list_rooms()
    }
}
