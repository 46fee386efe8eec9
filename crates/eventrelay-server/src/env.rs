//! Environment abstraction for deterministic testing.
//!
//! Decouples session logic from system resources (wall clock, randomness) so
//! tests can drive time explicitly and seed connection identifiers.

use chrono::{DateTime, Utc};

/// Abstract environment providing wall-clock time and randomness.
///
/// # Invariants
///
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - `wall_clock()` MAY go backwards (NTP adjustments); callers that need
///   monotonic timestamps clamp against the last value they observed
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current wall-clock time in UTC.
    fn wall_clock(&self) -> DateTime<Utc>;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
