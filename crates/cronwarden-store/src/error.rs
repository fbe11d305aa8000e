//! Store errors.

use cronwarden_protocols::{JobId, LifecycleStatus};
use cronwarden_schedule::ScheduleError;
use thiserror::Error;

/// Store error types.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Unknown job.
    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// Unknown version of a known job.
    #[error("Version {version} not found for job {job_id}")]
    VersionNotFound { job_id: JobId, version: u32 },

    /// Optimistic concurrency conflict. Refetch and retry.
    #[error("Concurrent modification of job {job_id}: expected version {expected}, found {actual}")]
    ConcurrentModification {
        job_id: JobId,
        expected: u32,
        actual: u32,
    },

    /// A job with this id already exists.
    #[error("Job already exists: {0}")]
    AlreadyExists(JobId),

    /// Schedule failed to parse or validate.
    #[error(transparent)]
    InvalidScheduleExpression(#[from] ScheduleError),

    /// Non-schedule fields failed validation.
    #[error("Invalid job definition: {}", .0.join("; "))]
    InvalidDefinition(Vec<String>),

    /// Lifecycle transition not allowed.
    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: JobId,
        from: LifecycleStatus,
        to: LifecycleStatus,
    },

    /// Archived jobs are read-only.
    #[error("Job {0} is archived")]
    Archived(JobId),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether refetching and retrying may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::ConcurrentModification { .. })
    }
}
