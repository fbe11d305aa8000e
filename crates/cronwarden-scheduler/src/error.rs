//! Scheduler errors.

use cronwarden_store::StoreError;
use thiserror::Error;

/// Scheduler error types.
///
/// Only failures that abort a whole tick are errors. Per-job failures are
/// logged and reported in the [`TickReport`](crate::TickReport).
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Scheduled jobs could not be listed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
