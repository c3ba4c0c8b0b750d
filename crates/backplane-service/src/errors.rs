//! Backplane error types.
//!
//! Errors fall into four groups: transient remote-call failures (a coordinator
//! or server observer did not answer), invalid input rejected before any actor
//! call, local connection write failures, and infrastructure errors (state
//! store, configuration). Only invalid input and infrastructure errors are ever
//! surfaced to callers of the send operations; the rest are absorbed by the
//! fan-out path and turned into subscriber eviction.

use thiserror::Error;

/// Backplane error type.
///
/// Maps to numeric codes for the hosting framework:
/// - `InvalidArgument`: `INVALID_ARGUMENT` (1)
/// - `ConnectionNotFound`: `NOT_FOUND` (4)
/// - `Unreachable`, `Timeout`, `Deactivated`: `UNAVAILABLE` (8)
/// - `ConnectionClosed`: `CONNECTION_CLOSED` (9)
/// - `StateStore`, `Redis`, `Config`, `Internal`: `INTERNAL_ERROR` (6)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackplaneError {
    /// A target identifier or argument was rejected before any actor call.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The connection is not registered on this server.
    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    /// A remote actor or server observer could not be reached.
    #[error("Unreachable: {0}")]
    Unreachable(String),

    /// A remote call did not complete within the call timeout.
    #[error("Call timed out after {0}ms")]
    Timeout(u64),

    /// The target actor deactivated while the call was queued.
    #[error("Actor deactivated")]
    Deactivated,

    /// A client connection refused a write.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Durable state could not be read or written.
    #[error("State store error: {0}")]
    StateStore(String),

    /// Redis operation failed.
    #[error("Redis error: {0}")]
    Redis(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BackplaneError {
    /// Returns the numeric error code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            BackplaneError::InvalidArgument(_) => 1,
            BackplaneError::ConnectionNotFound(_) => 4,
            BackplaneError::StateStore(_)
            | BackplaneError::Redis(_)
            | BackplaneError::Config(_)
            | BackplaneError::Internal(_) => 6,
            BackplaneError::Unreachable(_)
            | BackplaneError::Timeout(_)
            | BackplaneError::Deactivated => 8,
            BackplaneError::ConnectionClosed(_) => 9,
        }
    }

    /// Whether the error is a transient remote-call failure.
    ///
    /// Transient failures during fan-out or liveness pings mark the callee as
    /// defunct; they are never reported to the sender.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackplaneError::Unreachable(_)
                | BackplaneError::Timeout(_)
                | BackplaneError::Deactivated
        )
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            BackplaneError::InvalidArgument(msg) => msg.clone(),
            BackplaneError::ConnectionNotFound(_) => "Connection not found".to_string(),
            BackplaneError::Unreachable(_)
            | BackplaneError::Timeout(_)
            | BackplaneError::Deactivated => "Service temporarily unavailable".to_string(),
            BackplaneError::ConnectionClosed(_) => "Connection closed".to_string(),
            BackplaneError::StateStore(_)
            | BackplaneError::Redis(_)
            | BackplaneError::Config(_)
            | BackplaneError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}
