//! Execution trigger port.

use async_trait::async_trait;

use crate::error::PortError;
use crate::ids::{JobId, RunId};
use crate::job::Environment;
use crate::run::RunUpdate;

/// Starts job runs. The core does not manage a process after triggering it.
///
/// Run outcomes reach the core either through
/// `DeploymentOrchestrator::report_run` or by being returned from
/// [`poll_updates`](Self::poll_updates), which the scheduler calls every
/// tick.
#[async_trait]
pub trait ExecutionTriggerPort: Send + Sync {
    /// Start a run of `version` in `environment`.
    async fn trigger(
        &self,
        job_id: JobId,
        version: u32,
        environment: Environment,
    ) -> Result<RunId, PortError>;

    /// Ask the execution system to stop a run (used by the `Replace` policy).
    async fn cancel(&self, run_id: &RunId) -> Result<(), PortError>;

    /// Run state changes observed since the previous call.
    async fn poll_updates(&self) -> Result<Vec<RunUpdate>, PortError> {
        Ok(Vec::new())
    }
}
