//! Gating errors.

use cronwarden_store::StoreError;
use thiserror::Error;

/// Gating error types. Collaborator failures are not errors; they defer.
#[derive(Debug, Error)]
pub enum GatingError {
    /// The job could not be read.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
