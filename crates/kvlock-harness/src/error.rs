//! Error types for test runs.

use std::time::Duration;
use thiserror::Error;

use kvlock_checker::Counterexample;
use kvlock_core::{ClientId, Key, KvError, Version};
use kvlock_lock::LockError;

/// Errors that fail a test run.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// A client task panicked or could not finish.
    #[error("{client} failed: {reason}")]
    ClientFailed { client: ClientId, reason: String },

    /// A client found the critical section occupied while holding the lock.
    #[error("{client}: two clients acquired lock {key}, {shared} holds {observed:?}")]
    TwoHolders {
        client: ClientId,
        key: Key,
        shared: Key,
        observed: String,
    },

    /// The store returned a code the workload does not allow.
    #[error("{client}: {operation} returned unexpected {code}")]
    UnexpectedError {
        client: ClientId,
        operation: String,
        code: KvError,
    },

    /// The final version of a key disagrees with the puts clients counted.
    #[error("wrong number of puts on {key}: server at {version}, clients counted {ok} ok and {maybe} maybe")]
    WrongPutCount {
        key: Key,
        version: Version,
        ok: u64,
        maybe: u64,
    },

    /// A workload's own bookkeeping disagrees with the store.
    #[error("{client}: {message}")]
    WrongValue { client: ClientId, message: String },

    /// The recorded history has no linearization.
    #[error("history is not linearizable\n{0}")]
    NotLinearizable(Box<Counterexample>),

    /// The test ran past its wall-clock ceiling.
    #[error("test exceeded {0:?}")]
    Timeout(Duration),

    /// Lock protocol violation.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl HarnessError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a client failure.
    pub fn client_failed(client: ClientId, reason: impl Into<String>) -> Self {
        Self::ClientFailed {
            client,
            reason: reason.into(),
        }
    }

    /// Create an unexpected-code error.
    pub fn unexpected(client: ClientId, operation: impl Into<String>, code: KvError) -> Self {
        Self::UnexpectedError {
            client,
            operation: operation.into(),
            code,
        }
    }
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;
