//! Deployment errors.

use cronwarden_protocols::{ApprovalRequestId, DeploymentId, Environment, JobId, PortError, RunId};
use cronwarden_store::StoreError;
use thiserror::Error;

/// Deployment error types.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Job store failure, including unknown jobs.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Only the current head version can be deployed.
    #[error("Version {requested} of job {job_id} is not the head (head is {head}); roll back first")]
    NotHead {
        job_id: JobId,
        requested: u32,
        head: u32,
    },

    /// Another deployment of the job into this environment is underway.
    #[error("A deployment of job {job_id} to {environment} is already in progress")]
    AlreadyInProgress {
        job_id: JobId,
        environment: Environment,
    },

    /// The approval request was rejected. The job is back in Draft.
    #[error("Approval {request_id} for job {job_id} was rejected")]
    ApprovalRejected {
        job_id: JobId,
        request_id: ApprovalRequestId,
    },

    /// A collaborator call failed. Retry later.
    #[error("Collaborator call failed: {0}")]
    CollaboratorUnavailable(#[from] PortError),

    #[error("Deployment not found: {0}")]
    DeploymentNotFound(DeploymentId),

    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DeployError {
    /// Whether waiting and retrying may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            DeployError::AlreadyInProgress { .. } => true,
            DeployError::CollaboratorUnavailable(e) => e.is_transient(),
            DeployError::Store(e) => e.is_conflict(),
            _ => false,
        }
    }
}
