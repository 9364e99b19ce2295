//! Cart service errors.

use thiserror::Error;

/// Cart error variants.
#[derive(Debug, Error)]
pub enum CartError {
    /// The mutation request was malformed (e.g. an empty checkout selection).
    #[error("invalid cart request")]
    Validation,

    /// The targeted line no longer exists.
    #[error("cart line not found")]
    NotFound,

    /// A mutation for the same line is still waiting on the backend.
    #[error("cart operation already in flight")]
    OperationInFlight,

    /// A remote operation was attempted without credentials.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The bearer credential was rejected; the caller must re-authenticate.
    #[error("credential rejected or expired")]
    AuthExpired,

    /// Connectivity failure or timeout; the operation may be retried.
    #[error("network error")]
    TransientNetwork(#[source] reqwest::Error),

    /// The backend answered with an unexpected status.
    #[error("unexpected backend response: {0}")]
    UnexpectedResponse(String),

    /// Local persistence failed.
    #[error("storage error")]
    Storage(#[source] std::io::Error),

    /// Persisted cart state could not be encoded or decoded.
    #[error("corrupt persisted cart state")]
    CorruptState(#[source] serde_json::Error),
}

impl From<reqwest::Error> for CartError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) if status == reqwest::StatusCode::UNAUTHORIZED => Self::AuthExpired,
            Some(status) if status == reqwest::StatusCode::NOT_FOUND => Self::NotFound,
            _ => Self::TransientNetwork(error),
        }
    }
}

impl From<std::io::Error> for CartError {
    fn from(error: std::io::Error) -> Self {
        Self::Storage(error)
    }
}

impl From<serde_json::Error> for CartError {
    fn from(error: serde_json::Error) -> Self {
        Self::CorruptState(error)
    }
}
