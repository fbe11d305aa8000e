//! Deployment records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ApprovalRequestId, DeploymentId, JobId, RunId};
use crate::job::Environment;

/// Deployment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeploymentStatus {
    /// Schedule armed in the environment.
    Initiated,
    /// Deployment underway, including while waiting for approval.
    InProgress,
    /// First run after deployment succeeded.
    Completed,
    /// Approval rejected or first run failed.
    Failed,
    /// The job was rolled back while this deployment was active.
    RolledBack,
}

impl DeploymentStatus {
    /// Whether the deployment still governs the environment.
    pub fn is_active(self) -> bool {
        matches!(self, DeploymentStatus::Initiated | DeploymentStatus::InProgress)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One promotion of a job version into an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub deployment_id: DeploymentId,
    pub job_id: JobId,
    pub version: u32,
    pub environment: Environment,
    pub status: DeploymentStatus,
    pub timestamp: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub actor: String,
    #[serde(default)]
    pub approval_request: Option<ApprovalRequestId>,
    /// First run triggered under this deployment.
    #[serde(default)]
    pub first_run: Option<RunId>,
    /// Human readable reason for the current status.
    #[serde(default)]
    pub reason: Option<String>,
}

impl DeploymentRecord {
    /// Create an in-progress record.
    pub fn begin(job_id: JobId, version: u32, environment: Environment, actor: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            deployment_id: DeploymentId::new(),
            job_id,
            version,
            environment,
            status: DeploymentStatus::InProgress,
            timestamp: now,
            updated_at: now,
            actor: actor.into(),
            approval_request: None,
            first_run: None,
            reason: None,
        }
    }

    /// Whether this record is waiting on a manual approval.
    pub fn awaiting_approval(&self) -> bool {
        self.status == DeploymentStatus::InProgress && self.approval_request.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_is_in_progress() {
        let record = DeploymentRecord::begin(JobId::new(), 3, Environment::Staging, "ci");
        assert_eq!(record.status, DeploymentStatus::InProgress);
        assert_eq!(record.version, 3);
        assert!(!record.awaiting_approval());
    }

    #[test]
    fn test_awaiting_approval() {
        let mut record = DeploymentRecord::begin(JobId::new(), 1, Environment::Production, "ci");
        record.approval_request = Some(ApprovalRequestId::new("req-7"));
        assert!(record.awaiting_approval());
        record.status = DeploymentStatus::Failed;
        assert!(!record.awaiting_approval());
    }

    #[test]
    fn test_active_statuses() {
        assert!(DeploymentStatus::Initiated.is_active());
        assert!(DeploymentStatus::InProgress.is_active());
        assert!(!DeploymentStatus::Completed.is_active());
        assert!(!DeploymentStatus::RolledBack.is_active());
    }
}
