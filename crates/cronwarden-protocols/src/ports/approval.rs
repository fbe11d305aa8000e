//! Approval workflow port.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PortError;
use crate::ids::{ApprovalRequestId, JobId};

/// Status of an approval request as seen by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// External approval workflow. The core never inspects routing or approvers.
#[async_trait]
pub trait ApprovalWorkflowPort: Send + Sync {
    /// Open an approval request.
    async fn request_approval(
        &self,
        job_id: JobId,
        approvers: &[String],
        message: &str,
    ) -> Result<ApprovalRequestId, PortError>;

    /// Current status of a request.
    async fn get_status(&self, request_id: &ApprovalRequestId) -> Result<ApprovalStatus, PortError>;
}
