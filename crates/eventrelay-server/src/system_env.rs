//! Production Environment implementation using system time and RNG.
//!
//! `SystemEnv` reads the real UTC wall clock (chrono) and draws randomness from
//! the OS via getrandom. Connection identifiers are generated from this RNG, so
//! production behavior is non-deterministic.

use chrono::{DateTime, Utc};

use crate::env::Environment;

/// Production environment using system time and cryptographic RNG.
///
/// # Panics
///
/// Panics if the OS RNG fails. A server that cannot draw randomness cannot
/// hand out unguessable connection identifiers, and RNG failure indicates an
/// OS-level fault.
#[derive(Debug, Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn wall_clock(&self) -> DateTime<Utc> {
        Utc::now()
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn system_env_clock_advances() {
        let env = SystemEnv::new();

        let t1 = env.wall_clock();
        std::thread::sleep(Duration::from_millis(10));
        let t2 = env.wall_clock();

        assert!(t2 > t1, "Wall clock should advance");
    }

    #[test]
    fn system_env_random_values_differ() {
        let env = SystemEnv::new();

        let mut bytes1 = [0u8; 32];
        let mut bytes2 = [0u8; 32];
        env.random_bytes(&mut bytes1);
        env.random_bytes(&mut bytes2);

        // Extremely unlikely to be equal if random
        assert_ne!(bytes1, bytes2);
        assert_ne!(env.random_u64(), env.random_u64());
    }
}
