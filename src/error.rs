//! Error types for the publication engine.

use crate::types::ConnectionId;
use thiserror::Error;

/// Main error type for registry operations.
#[derive(Debug, Error)]
pub enum PublicationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown filter: {0}")]
    UnknownFilter(String),

    #[error("Connection is closed: {0}")]
    StaleConnection(ConnectionId),

    #[error("Connection already open: {0}")]
    ConnectionExists(ConnectionId),

    /// Raised by a filter factory while compiling; passed through untouched.
    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for PublicationError {
    fn from(e: serde_json::Error) -> Self {
        PublicationError::Serialization(e.to_string())
    }
}

/// Error produced by filter code: factories rejecting their params, or
/// predicates failing on a record.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("Invalid filter params: {0}")]
    InvalidParams(String),

    #[error("Predicate failed: {0}")]
    Evaluation(String),
}

impl FilterError {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        FilterError::InvalidParams(message.into())
    }

    pub fn evaluation(message: impl Into<String>) -> Self {
        FilterError::Evaluation(message.into())
    }
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, PublicationError>;
