//! Rollback Coordinator.
//!
//! Reverting content and re-arming it are two separate steps. A rollback
//! produces a new head version in `Draft`, marks active deployments as
//! rolled back, and returns a [`PendingRedeploy`] that the caller redeems
//! with [`RollbackCoordinator::redeploy`].

use cronwarden_protocols::{DeploymentRecord, Environment, JobId};
use tracing::info;

use crate::error::DeployError;
use crate::orchestrator::DeploymentOrchestrator;

/// Token for re-arming a rolled back job.
#[must_use = "a rollback leaves the job unscheduled until it is redeployed"]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRedeploy {
    pub job_id: JobId,
    /// The new head version created by the rollback.
    pub version: u32,
    pub environment: Environment,
    /// Version that was the head before the rollback.
    pub rolled_back_from: u32,
    /// Deployments marked as rolled back.
    pub superseded: Vec<DeploymentRecord>,
}

/// Reverts jobs to earlier versions.
#[derive(Clone)]
pub struct RollbackCoordinator {
    orchestrator: DeploymentOrchestrator,
}

impl RollbackCoordinator {
    pub fn new(orchestrator: DeploymentOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// Roll a job back to `target_version` and prepare a redeploy into
    /// `environment`. Nothing is armed until the token is redeemed.
    pub async fn rollback_and_redeploy(
        &self,
        job_id: &JobId,
        target_version: u32,
        environment: Environment,
        actor: &str,
    ) -> Result<PendingRedeploy, DeployError> {
        let store = self.orchestrator.store();
        let before = store.get(job_id).await?;
        let version = store.rollback(job_id, target_version, actor).await?;
        let superseded = self.orchestrator.mark_rolled_back(job_id, actor).await?;

        info!(
            "Job {} rolled back from version {} to {} (new version {}), {} deployment(s) superseded",
            job_id,
            before.current_version,
            target_version,
            version,
            superseded.len()
        );

        Ok(PendingRedeploy {
            job_id: *job_id,
            version,
            environment,
            rolled_back_from: before.current_version,
            superseded,
        })
    }

    /// Deploy the version created by a rollback.
    ///
    /// Fails with [`DeployError::NotHead`] when the job was edited after the
    /// rollback.
    pub async fn redeploy(
        &self,
        pending: PendingRedeploy,
        actor: &str,
    ) -> Result<DeploymentRecord, DeployError> {
        self.orchestrator
            .deploy(&pending.job_id, pending.version, pending.environment, actor)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use async_trait::async_trait;
    use cronwarden_gating::InstanceTracker;
    use cronwarden_protocols::{
        ApprovalRequestId, ApprovalStatus, ApprovalWorkflowPort, DeploymentStatus,
        ExecutionSpec, ExecutionTriggerPort, JobSpec, LifecycleStatus, PortError, RunId,
        ScheduleSpec,
    };
    use cronwarden_store::{JobDefinitionStore, StoreError};

    use crate::repository::MemoryDeploymentRepository;

    struct AutoApprove;

    #[async_trait]
    impl ApprovalWorkflowPort for AutoApprove {
        async fn request_approval(
            &self,
            _job_id: JobId,
            _approvers: &[String],
            _message: &str,
        ) -> Result<ApprovalRequestId, PortError> {
            Ok(ApprovalRequestId::new("req-1"))
        }

        async fn get_status(&self, _id: &ApprovalRequestId) -> Result<ApprovalStatus, PortError> {
            Ok(ApprovalStatus::Approved)
        }
    }

    struct NullExecutor;

    #[async_trait]
    impl ExecutionTriggerPort for NullExecutor {
        async fn trigger(
            &self,
            _job_id: JobId,
            _version: u32,
            _environment: Environment,
        ) -> Result<RunId, PortError> {
            Ok(RunId::new("run-1"))
        }

        async fn cancel(&self, _run_id: &RunId) -> Result<(), PortError> {
            Ok(())
        }
    }

    fn coordinator() -> (JobDefinitionStore, DeploymentOrchestrator, RollbackCoordinator) {
        let store = JobDefinitionStore::in_memory();
        let orchestrator = DeploymentOrchestrator::new(
            store.clone(),
            Arc::new(MemoryDeploymentRepository::new()),
            Arc::new(AutoApprove),
            Arc::new(NullExecutor),
            Arc::new(InstanceTracker::new()),
        );
        let coordinator = RollbackCoordinator::new(orchestrator.clone());
        (store, orchestrator, coordinator)
    }

    fn spec() -> JobSpec {
        JobSpec::new(
            "export-ledger",
            ScheduleSpec::new("30 1 * * *"),
            ExecutionSpec::new("export.sh").with_args(vec!["--full".to_string()]),
        )
    }

    #[tokio::test]
    async fn test_rollback_then_redeploy() {
        let (store, orchestrator, coordinator) = coordinator();
        let job = store.create(spec(), "alice").await.unwrap();
        store
            .save(
                &job.id,
                1,
                |s| s.execution.args = vec!["--incremental".to_string()],
                "switch to incremental",
                "alice",
            )
            .await
            .unwrap();
        let deployed = orchestrator
            .deploy(&job.id, 2, Environment::Production, "alice")
            .await
            .unwrap();

        let pending = coordinator
            .rollback_and_redeploy(&job.id, 1, Environment::Production, "bob")
            .await
            .unwrap();
        assert_eq!(pending.version, 3);
        assert_eq!(pending.rolled_back_from, 2);
        assert_eq!(pending.superseded.len(), 1);
        assert_eq!(pending.superseded[0].deployment_id, deployed.deployment_id);
        assert_eq!(pending.superseded[0].status, DeploymentStatus::RolledBack);

        // Nothing is armed until the token is redeemed.
        let head = store.get(&job.id).await.unwrap();
        assert_eq!(head.status, LifecycleStatus::Draft);
        assert_eq!(head.spec, store.version(&job.id, 1).await.unwrap().spec);

        let record = coordinator.redeploy(pending, "bob").await.unwrap();
        assert_eq!(record.version, 3);
        assert_eq!(record.status, DeploymentStatus::Initiated);
        assert_eq!(
            store.get(&job.id).await.unwrap().status,
            LifecycleStatus::Scheduled
        );
    }

    #[tokio::test]
    async fn test_redeploy_after_further_edit_is_rejected() {
        let (store, _orchestrator, coordinator) = coordinator();
        let job = store.create(spec(), "alice").await.unwrap();
        store
            .save(&job.id, 1, |s| s.tags.push("v2".into()), "tag", "alice")
            .await
            .unwrap();

        let pending = coordinator
            .rollback_and_redeploy(&job.id, 1, Environment::Staging, "bob")
            .await
            .unwrap();
        store
            .save(&job.id, 3, |s| s.tags.push("v4".into()), "tag", "carol")
            .await
            .unwrap();

        let err = coordinator.redeploy(pending, "bob").await.unwrap_err();
        assert!(matches!(err, DeployError::NotHead { head: 4, .. }));
    }

    #[tokio::test]
    async fn test_rollback_to_unknown_version() {
        let (store, _orchestrator, coordinator) = coordinator();
        let job = store.create(spec(), "alice").await.unwrap();

        let err = coordinator
            .rollback_and_redeploy(&job.id, 7, Environment::Staging, "bob")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DeployError::Store(StoreError::VersionNotFound { version: 7, .. })
        ));
    }
}
