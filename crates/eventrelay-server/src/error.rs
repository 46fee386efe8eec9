//! Server error types.

use std::fmt;

use crate::{auth::AuthError, storage::StorageError};

/// Errors that can occur while starting or running the server.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error (empty bind address, missing key material, etc.).
    ///
    /// These are fatal errors that prevent server startup. Fix configuration
    /// and restart.
    Config(String),

    /// Transport/network error (bind failure, accept loop failure, etc.).
    Transport(String),

    /// Token verifier could not be built.
    Auth(AuthError),

    /// Storage backend could not be opened.
    Storage(StorageError),

    /// Internal error (task panicked, unexpected state).
    ///
    /// Should never happen in correct implementation. Indicates a bug.
    Internal(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Auth(err) => write!(f, "auth error: {err}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Auth(err) => Some(err),
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<AuthError> for ServerError {
    fn from(err: AuthError) -> Self {
        Self::Auth(err)
    }
}

impl From<StorageError> for ServerError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn wraps_sources() {
        let err = ServerError::from(AuthError::Config("empty secret".into()));
        assert_eq!(err.to_string(), "auth error: verifier configuration error: empty secret");
        assert!(err.source().is_some());

        let err = ServerError::Config("bad".into());
        assert!(err.source().is_none());
    }

    #[test]
    fn io_errors_are_transport_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use");
        assert!(matches!(ServerError::from(io), ServerError::Transport(_)));
    }
}
