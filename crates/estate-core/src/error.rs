//! Error types for the cache coordinator.
//!
//! Caller-visible failures (network fetches, installs) propagate through
//! [`CoordinatorError`]; bookkeeping failures such as a stale generation that
//! refuses to delete are logged by the caller and never surface here.

use std::path::PathBuf;
use thiserror::Error;

use crate::lifecycle::InstanceState;

/// Main error type for the coordinator.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Upstream returned {status} for {url}")]
    UpstreamStatus { url: String, status: u16 },

    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

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

    // Lifecycle errors
    #[error("Install of generation {generation} failed: {message}")]
    InstallFailed { generation: String, message: String },

    #[error("Invalid coordinator state: expected {expected}, got {actual}")]
    InvalidState {
        expected: &'static str,
        actual: InstanceState,
    },

    #[error("No waiting coordinator instance to activate")]
    NothingWaiting,

    #[error("Generation not found: {0}")]
    GenerationNotFound(String),

    #[error("No active coordinator instance")]
    NoActiveInstance,

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Background task failed: {0}")]
    Task(String),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for coordinator operations.
pub type Result<T> = std::result::Result<T, CoordinatorError>;

impl From<std::io::Error> for CoordinatorError {
    fn from(err: std::io::Error) -> Self {
        CoordinatorError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for CoordinatorError {
    fn from(err: serde_json::Error) -> Self {
        CoordinatorError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for CoordinatorError {
    fn from(err: rusqlite::Error) -> Self {
        CoordinatorError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<tokio::task::JoinError> for CoordinatorError {
    fn from(err: tokio::task::JoinError) -> Self {
        CoordinatorError::Task(err.to_string())
    }
}

impl CoordinatorError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        CoordinatorError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Build a database error for a poisoned connection lock.
    pub(crate) fn lock_poisoned(err: impl std::fmt::Display) -> Self {
        CoordinatorError::Database {
            message: format!("Failed to lock database: {}", err),
            source: None,
        }
    }

    /// Map to the HTTP status the adapter answers with.
    ///
    /// - 502: the upstream could not be reached or answered badly
    /// - 504: the upstream timed out
    /// - 404: unknown generation
    /// - 503: nothing is active yet
    /// - 409: lifecycle call made in the wrong state
    /// - 400: bad configuration input
    /// - 500: everything else
    pub fn to_http_status(&self) -> u16 {
        match self {
            CoordinatorError::Network { .. }
            | CoordinatorError::UpstreamStatus { .. }
            | CoordinatorError::InstallFailed { .. } => 502,

            CoordinatorError::Timeout(_) => 504,

            CoordinatorError::GenerationNotFound(_) => 404,

            CoordinatorError::NoActiveInstance => 503,

            CoordinatorError::InvalidState { .. } | CoordinatorError::NothingWaiting => 409,

            CoordinatorError::Config { .. } => 400,

            _ => 500,
        }
    }

    /// True when the failure came from talking to the network.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            CoordinatorError::Network { .. }
                | CoordinatorError::Timeout(_)
                | CoordinatorError::UpstreamStatus { .. }
        )
    }
}
