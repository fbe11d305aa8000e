//! Collaborator port errors.

use thiserror::Error;

/// Errors returned by collaborator ports.
#[derive(Debug, Clone, Error)]
pub enum PortError {
    /// Collaborator could not be reached or timed out. Callers retry later.
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    /// Collaborator refused the request.
    #[error("Collaborator rejected request: {0}")]
    Rejected(String),

    /// The collaborator does not support this kind of request.
    #[error("Unsupported request: {0}")]
    Unsupported(String),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl PortError {
    /// Whether a later retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, PortError::Unavailable(_))
    }
}
