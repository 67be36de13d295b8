//! Error types for the optimizer engine and its collaborators

use thiserror::Error;

/// Errors returned by inventory, telemetry, remote execution and action services
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    /// Requested resource does not exist (e.g. volume already deleted)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource is in a state that conflicts with the request (e.g. already detached)
    #[error("Incorrect state: {0}")]
    IncorrectState(String),

    /// Request was rejected as malformed by the platform
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Service could not be reached or refused the call
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// True for conflicts that mean the requested end state already holds
    pub fn is_idempotent_conflict(&self) -> bool {
        matches!(self, BackendError::IncorrectState(_) | BackendError::NotFound(_))
    }
}

/// Errors that abort an entire analysis pass
#[derive(Debug, Error)]
pub enum EngineError {
    /// Volume inventory could not be listed or resolved
    #[error("Failed to load volume inventory: {0}")]
    Inventory(#[from] BackendError),

    /// The caller named volumes that the inventory does not know about
    #[error("Unknown volume ids: {}", .0.join(", "))]
    UnknownVolumes(Vec<String>),

    /// A worker task panicked or was cancelled
    #[error("Analysis worker failed: {0}")]
    Worker(String),
}

/// Result type alias for collaborator calls
pub type BackendResult<T> = std::result::Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotent_conflicts() {
        assert!(BackendError::IncorrectState("detaching".to_string()).is_idempotent_conflict());
        assert!(BackendError::NotFound("vol-1".to_string()).is_idempotent_conflict());
        assert!(!BackendError::Unavailable("throttled".to_string()).is_idempotent_conflict());
        assert!(!BackendError::InvalidParameter("size".to_string()).is_idempotent_conflict());
    }
}
