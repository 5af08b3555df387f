//! Transport-specific error types.

use thiserror::Error;

/// Errors that can occur when calling a remote method.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The request or its reply was lost. The method may or may not have run.
    #[error("request or reply dropped")]
    Dropped,

    /// No server with this name is reachable.
    #[error("unknown server: {0}")]
    UnknownServer(String),

    /// The server has no service with this name.
    #[error("unknown service: {0}")]
    UnknownService(String),

    /// The service has no method with this name.
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// Failed to encode or decode a message.
    #[error("codec error: {0}")]
    Codec(String),
}

impl TransportError {
    /// Creates a new unknown server error.
    pub fn unknown_server(name: impl Into<String>) -> Self {
        Self::UnknownServer(name.into())
    }

    /// Creates a new unknown service error.
    pub fn unknown_service(name: impl Into<String>) -> Self {
        Self::UnknownService(name.into())
    }

    /// Creates a new unknown method error.
    pub fn unknown_method(name: impl Into<String>) -> Self {
        Self::UnknownMethod(name.into())
    }

    /// Creates a new codec error.
    pub fn codec(err: impl std::fmt::Display) -> Self {
        Self::Codec(err.to_string())
    }

    /// Returns true if retrying the same call can succeed.
    ///
    /// An unreachable server looks exactly like a partition, so it is
    /// retryable. The remaining variants are wiring bugs.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Dropped | Self::UnknownServer(_))
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::codec(err)
    }
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
