//! Crate-wide error types.
//!
//! Every fallible operation in this crate returns `Result<T, CoreError>` (or a narrower
//! error that converts into it via `?`). No `unwrap`/`expect` outside of tests.

use thiserror::Error;

/// Kinds of failure the Store can surface, per spec §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    Timeout,
    ConnectionLost,
    Protocol,
}

/// Top-level error type returned by every component in this crate.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("store error ({kind:?}): {message}")]
    Store {
        kind: StoreErrorKind,
        message: String,
    },

    #[error("task {0} not found")]
    TaskNotFound(String),

    #[error("illegal transition for task {id}: expected state in {expected:?}, found {actual}")]
    IllegalTransition {
        id: String,
        expected: Vec<String>,
        actual: String,
    },

    #[error("provider call failed: {0}")]
    Provider(String),

    #[error("circuit breaker open for provider {0}")]
    CircuitOpen(String),

    #[error("rate limiter acquire timed out after {0:.1}s")]
    RateLimitTimeout(f64),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl From<redis::RedisError> for CoreError {
    fn from(err: redis::RedisError) -> Self {
        let kind = if err.is_timeout() {
            StoreErrorKind::Timeout
        } else if err.is_connection_dropped() || err.is_connection_refusal() {
            StoreErrorKind::ConnectionLost
        } else {
            StoreErrorKind::Protocol
        };
        CoreError::Store {
            kind,
            message: err.to_string(),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
