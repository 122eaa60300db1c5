//! Error types for Tether.
//!
//! Infrastructure failures (persistence, directory, transport) each get a
//! distinct variant so callers can decide which ones are fatal. Handler
//! failures never show up here; the dispatcher isolates and logs them.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::codec::DecodeError;

/// Main error type for the Tether runtime.
#[derive(Debug, Error)]
pub enum TetherError {
    // Persistence errors
    #[error("Corrupt persisted state at byte {offset}: {reason}")]
    CorruptPersistedState { offset: usize, reason: String },

    // Directory errors
    #[error("Directory unavailable: {message}")]
    DirectoryUnavailable { message: String },

    // Transport errors
    #[error("Transport failure for {endpoint}: {message}")]
    TransportFailure { endpoint: String, message: String },

    #[error("Not connected")]
    NotConnected,

    #[error("Invalid connection state: expected {expected}, found {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    // Dispatch errors
    #[error("Event dispatcher has been dropped")]
    DispatcherClosed,

    // Decoding errors
    #[error(transparent)]
    Decode(#[from] DecodeError),

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Tether operations.
pub type Result<T> = std::result::Result<T, TetherError>;

impl From<std::io::Error> for TetherError {
    fn from(err: std::io::Error) -> Self {
        TetherError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for TetherError {
    fn from(err: serde_json::Error) -> Self {
        TetherError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl TetherError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        TetherError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a transport failure for an endpoint.
    pub fn transport(endpoint: impl std::fmt::Display, message: impl Into<String>) -> Self {
        TetherError::TransportFailure {
            endpoint: endpoint.to_string(),
            message: message.into(),
        }
    }

    /// Create a directory failure.
    pub fn directory(message: impl Into<String>) -> Self {
        TetherError::DirectoryUnavailable {
            message: message.into(),
        }
    }

    /// Check if a fresh connection attempt might succeed where this one failed.
    ///
    /// Used by opt-in reconnect policies; the supervisor itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TetherError::TransportFailure { .. } | TetherError::Timeout(_)
        )
    }

    /// Check if this error ends a startup attempt.
    pub fn is_fatal_for_startup(&self) -> bool {
        matches!(self, TetherError::DirectoryUnavailable { .. })
    }
}
