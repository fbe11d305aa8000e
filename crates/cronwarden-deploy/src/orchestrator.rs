//! Deployment Orchestrator.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cronwarden_gating::InstanceTracker;
use cronwarden_protocols::{
    bounded, ApprovalRef, ApprovalStatus, ApprovalWorkflowPort, DeploymentId, DeploymentRecord,
    DeploymentStatus, Environment, ExecutionTriggerPort, JobDefinition, JobEventKind, JobId,
    LifecycleStatus, Observers, RunId, RunInstance, RunState, DEFAULT_PORT_TIMEOUT,
};
use cronwarden_store::{JobDefinitionStore, StoreError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::DeployError;
use crate::repository::DeploymentRepository;

/// Actor recorded for actions taken by the scheduling loop.
pub const SCHEDULER_ACTOR: &str = "scheduler";

/// Actor recorded for run states pulled from the execution system.
pub const EXECUTOR_ACTOR: &str = "executor";

type ClaimKey = (JobId, Environment);

/// In-process claim on a `(job, environment)` pair, released on drop.
struct Claim {
    claims: Arc<Mutex<HashSet<ClaimKey>>>,
    key: ClaimKey,
}

impl Claim {
    fn acquire(claims: &Arc<Mutex<HashSet<ClaimKey>>>, key: ClaimKey) -> Option<Self> {
        if !claims.lock().insert(key) {
            return None;
        }
        Some(Self {
            claims: claims.clone(),
            key,
        })
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.claims.lock().remove(&self.key);
    }
}

/// Sole writer of deployment records.
///
/// `deploy` is serialized per `(job, environment)`; different jobs and
/// different environments proceed in parallel.
#[derive(Clone)]
pub struct DeploymentOrchestrator {
    store: JobDefinitionStore,
    deployments: Arc<dyn DeploymentRepository>,
    approvals: Arc<dyn ApprovalWorkflowPort>,
    executor: Arc<dyn ExecutionTriggerPort>,
    tracker: Arc<InstanceTracker>,
    observers: Observers,
    port_timeout: Duration,
    claims: Arc<Mutex<HashSet<ClaimKey>>>,
}

impl DeploymentOrchestrator {
    /// Create a new orchestrator.
    pub fn new(
        store: JobDefinitionStore,
        deployments: Arc<dyn DeploymentRepository>,
        approvals: Arc<dyn ApprovalWorkflowPort>,
        executor: Arc<dyn ExecutionTriggerPort>,
        tracker: Arc<InstanceTracker>,
    ) -> Self {
        Self {
            store,
            deployments,
            approvals,
            executor,
            tracker,
            observers: Observers::noop(),
            port_timeout: DEFAULT_PORT_TIMEOUT,
            claims: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Report transitions to these observers.
    pub fn with_observers(mut self, observers: Observers) -> Self {
        self.observers = observers;
        self
    }

    /// Bound approval and execution calls by `timeout`.
    pub fn with_port_timeout(mut self, timeout: Duration) -> Self {
        self.port_timeout = timeout;
        self
    }

    pub fn store(&self) -> &JobDefinitionStore {
        &self.store
    }

    /// Arm `version` of a job in `environment`.
    ///
    /// `version` must be the current head. When the job requires manual
    /// approval the first call opens an approval request and returns an
    /// `InProgress` record; calling again resumes that deployment once the
    /// request is resolved.
    pub async fn deploy(
        &self,
        job_id: &JobId,
        version: u32,
        environment: Environment,
        actor: &str,
    ) -> Result<DeploymentRecord, DeployError> {
        let already = || DeployError::AlreadyInProgress {
            job_id: *job_id,
            environment,
        };
        let _claim = Claim::acquire(&self.claims, (*job_id, environment)).ok_or_else(already)?;

        let job = self.store.get(job_id).await?;
        if job.status.is_terminal() {
            return Err(StoreError::Archived(*job_id).into());
        }
        if version != job.current_version {
            return Err(DeployError::NotHead {
                job_id: *job_id,
                requested: version,
                head: job.current_version,
            });
        }

        let pending = match self.in_progress(job_id, environment).await? {
            Some(record) if record.awaiting_approval() && record.version == version => Some(record),
            Some(record) if record.awaiting_approval() => {
                let reason = format!("superseded by version {}", version);
                self.settle(record, DeploymentStatus::Failed, reason, actor)
                    .await?;
                None
            }
            Some(_) => return Err(already()),
            None => None,
        };

        match pending {
            Some(record) => self.resume(&job, record, actor).await,
            None => self.begin(&job, environment, actor).await,
        }
    }

    /// Re-invoke every deployment waiting on an approval.
    ///
    /// Returns the records whose status changed.
    pub async fn resume_pending(&self) -> Result<Vec<DeploymentRecord>, DeployError> {
        let mut changed = Vec::new();

        for record in self
            .deployments
            .list_by_status(DeploymentStatus::InProgress)
            .await?
        {
            if !record.awaiting_approval() {
                continue;
            }
            let actor = record.actor.clone();

            let job = match self.store.get(&record.job_id).await {
                Ok(job) => job,
                Err(StoreError::NotFound(_)) => {
                    changed.push(
                        self.settle(record, DeploymentStatus::Failed, "job not found", &actor)
                            .await?,
                    );
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if job.status.is_terminal() || job.current_version != record.version {
                let reason = if job.status.is_terminal() {
                    "job archived".to_string()
                } else {
                    format!("superseded by version {}", job.current_version)
                };
                changed.push(
                    self.settle(record, DeploymentStatus::Failed, reason, &actor)
                        .await?,
                );
                continue;
            }

            let id = record.deployment_id;
            match self
                .deploy(&record.job_id, record.version, record.environment, &actor)
                .await
            {
                Ok(updated) if updated.status != DeploymentStatus::InProgress => {
                    changed.push(updated)
                }
                Ok(_) => debug!("Deployment {} still awaiting approval", id),
                Err(DeployError::ApprovalRejected { .. }) => {
                    if let Some(updated) = self.deployments.get(&id).await? {
                        changed.push(updated);
                    }
                }
                Err(DeployError::AlreadyInProgress { .. }) => {
                    debug!("Deployment {} is being resumed elsewhere", id)
                }
                Err(e) => warn!("Failed to resume deployment {}: {}", id, e),
            }
        }

        Ok(changed)
    }

    /// Start a run of the job's head in its armed environment.
    pub async fn trigger(
        &self,
        job: &JobDefinition,
        fire_time: DateTime<Utc>,
    ) -> Result<RunInstance, DeployError> {
        let armed = self.armed_deployment(job).await?;
        let environment = armed
            .as_ref()
            .map_or(job.spec.environment, |d| d.environment);

        let run_id = bounded(
            self.port_timeout,
            "execution trigger",
            self.executor.trigger(job.id, job.current_version, environment),
        )
        .await?;
        let run = RunInstance::started(
            run_id.clone(),
            job.id,
            job.current_version,
            environment,
            fire_time,
        );
        self.tracker.record(run.clone());

        if let Some(mut deployment) = armed {
            if deployment.status == DeploymentStatus::Initiated && deployment.first_run.is_none() {
                deployment.first_run = Some(run_id.clone());
                deployment.updated_at = Utc::now();
                self.deployments.update(&deployment).await?;
            }
        }

        info!(
            "Triggered run {} of job {} v{} in {} for {}",
            run_id, job.id, job.current_version, environment, fire_time
        );
        self.observers.emit(
            SCHEDULER_ACTOR,
            job.id,
            JobEventKind::RunTriggered { run_id, fire_time },
        );
        Ok(run)
    }

    /// Ask the execution system to stop runs. Returns the runs it accepted.
    pub async fn cancel_runs(&self, job_id: &JobId, runs: &[RunId]) -> Vec<RunId> {
        let mut cancelled = Vec::new();
        for run_id in runs {
            match bounded(self.port_timeout, "run cancel", self.executor.cancel(run_id)).await {
                Ok(()) => {
                    self.tracker.report(run_id, RunState::Cancelled);
                    cancelled.push(run_id.clone());
                }
                Err(e) => warn!("Failed to cancel run {} of job {}: {}", run_id, job_id, e),
            }
        }

        if !cancelled.is_empty() {
            self.observers.emit(
                SCHEDULER_ACTOR,
                *job_id,
                JobEventKind::RunsCancelled {
                    runs: cancelled.clone(),
                },
            );
        }
        cancelled
    }

    /// Record a run state reported by the execution system.
    ///
    /// The first terminal state of the first run after a deployment settles
    /// that deployment as `Completed` or `Failed`.
    pub async fn report_run(
        &self,
        run_id: &RunId,
        state: RunState,
        actor: &str,
    ) -> Result<RunInstance, DeployError> {
        let run = self
            .tracker
            .report(run_id, state)
            .ok_or_else(|| DeployError::RunNotFound(run_id.clone()))?;

        self.observers.emit(
            actor,
            run.job_id,
            JobEventKind::RunReported {
                run_id: run_id.clone(),
                state,
            },
        );

        if !state.is_terminal() {
            return Ok(run);
        }

        let deployment = self
            .deployments
            .list_for_job(&run.job_id)
            .await?
            .into_iter()
            .find(|d| d.status == DeploymentStatus::Initiated && d.first_run.as_ref() == Some(run_id));

        if let Some(mut deployment) = deployment {
            match state {
                RunState::Succeeded => {
                    self.settle(deployment, DeploymentStatus::Completed, "first run succeeded", actor)
                        .await?;
                }
                RunState::Failed => {
                    self.settle(deployment, DeploymentStatus::Failed, "first run failed", actor)
                        .await?;
                }
                RunState::Cancelled | RunState::Running => {
                    // The next run settles the deployment instead.
                    deployment.first_run = None;
                    deployment.updated_at = Utc::now();
                    self.deployments.update(&deployment).await?;
                }
            }
        }
        Ok(run)
    }

    /// Pull run state changes from the execution system and record them.
    ///
    /// Returns the runs that were updated. Updates for runs this process
    /// never triggered are skipped.
    pub async fn collect_run_updates(&self) -> Result<Vec<RunInstance>, DeployError> {
        let updates = bounded(self.port_timeout, "run updates", self.executor.poll_updates()).await?;

        let mut reported = Vec::new();
        for update in updates {
            match self
                .report_run(&update.run_id, update.state, EXECUTOR_ACTOR)
                .await
            {
                Ok(run) => reported.push(run),
                Err(DeployError::RunNotFound(run_id)) => {
                    debug!("Ignoring update of unknown run {}", run_id)
                }
                Err(e) => warn!("Failed to record state of run {}: {}", update.run_id, e),
            }
        }
        Ok(reported)
    }

    /// Mark every active deployment of a job as rolled back.
    pub async fn mark_rolled_back(
        &self,
        job_id: &JobId,
        actor: &str,
    ) -> Result<Vec<DeploymentRecord>, DeployError> {
        let mut rolled_back = Vec::new();
        for record in self.deployments.list_for_job(job_id).await? {
            if record.status.is_active() {
                rolled_back.push(
                    self.settle(record, DeploymentStatus::RolledBack, "job rolled back", actor)
                        .await?,
                );
            }
        }
        Ok(rolled_back)
    }

    /// Every deployment of a job, oldest first.
    pub async fn deployments(&self, job_id: &JobId) -> Result<Vec<DeploymentRecord>, DeployError> {
        self.deployments.list_for_job(job_id).await
    }

    pub async fn deployment(&self, id: &DeploymentId) -> Result<DeploymentRecord, DeployError> {
        self.deployments
            .get(id)
            .await?
            .ok_or(DeployError::DeploymentNotFound(*id))
    }

    async fn in_progress(
        &self,
        job_id: &JobId,
        environment: Environment,
    ) -> Result<Option<DeploymentRecord>, DeployError> {
        Ok(self
            .deployments
            .find(job_id, environment, DeploymentStatus::InProgress)
            .await?
            .pop())
    }

    /// The most recent deployment that armed the head version.
    async fn armed_deployment(
        &self,
        job: &JobDefinition,
    ) -> Result<Option<DeploymentRecord>, DeployError> {
        Ok(self
            .deployments
            .list_for_job(&job.id)
            .await?
            .into_iter()
            .rev()
            .find(|d| d.version == job.current_version && is_armed(d)))
    }

    async fn begin(
        &self,
        job: &JobDefinition,
        environment: Environment,
        actor: &str,
    ) -> Result<DeploymentRecord, DeployError> {
        let mut record = DeploymentRecord::begin(job.id, job.current_version, environment, actor);

        if job.spec.gating.manual_approval_required {
            let message = format!(
                "Deploy '{}' version {} to {}",
                job.spec.name, job.current_version, environment
            );
            let request_id = bounded(
                self.port_timeout,
                "approval request",
                self.approvals.request_approval(job.id, &job.spec.gating.approvers, &message),
            )
            .await?;

            let approval = ApprovalRef {
                request_id: request_id.clone(),
                version: job.current_version,
                environment,
                requested_at: Utc::now(),
            };
            self.store.record_approval(&job.id, Some(approval), actor).await?;

            record.approval_request = Some(request_id.clone());
            record.reason = Some(format!("awaiting approval {}", request_id));
            self.deployments.insert(&record).await?;

            info!(
                "Deployment {} of job {} to {} awaits approval {}",
                record.deployment_id, job.id, environment, request_id
            );
            self.emit_deployment(actor, &record);
            return Ok(record);
        }

        self.deployments.insert(&record).await?;
        self.emit_deployment(actor, &record);
        self.arm(record, actor).await
    }

    async fn resume(
        &self,
        job: &JobDefinition,
        record: DeploymentRecord,
        actor: &str,
    ) -> Result<DeploymentRecord, DeployError> {
        let Some(request_id) = record.approval_request.clone() else {
            return self.arm(record, actor).await;
        };

        let status = bounded(
            self.port_timeout,
            "approval status",
            self.approvals.get_status(&request_id),
        )
        .await?;
        match status {
            ApprovalStatus::Pending => {
                debug!("Approval {} for job {} still pending", request_id, job.id);
                Ok(record)
            }
            ApprovalStatus::Rejected => {
                self.settle(record, DeploymentStatus::Failed, "approval rejected", actor)
                    .await?;
                self.store.record_approval(&job.id, None, actor).await?;
                if job.status != LifecycleStatus::Draft
                    && job.status.can_transition_to(LifecycleStatus::Draft)
                {
                    self.store
                        .transition(&job.id, LifecycleStatus::Draft, actor)
                        .await?;
                }
                warn!("Approval {} for job {} was rejected", request_id, job.id);
                Err(DeployError::ApprovalRejected {
                    job_id: job.id,
                    request_id,
                })
            }
            ApprovalStatus::Approved => {
                if job.status == LifecycleStatus::Draft {
                    self.store
                        .transition(&job.id, LifecycleStatus::Approved, actor)
                        .await?;
                }
                self.arm(record, actor).await
            }
        }
    }

    /// Move the job to `Scheduled` and mark the record `Initiated`.
    async fn arm(
        &self,
        mut record: DeploymentRecord,
        actor: &str,
    ) -> Result<DeploymentRecord, DeployError> {
        if let Err(e) = self
            .store
            .transition(&record.job_id, LifecycleStatus::Scheduled, actor)
            .await
        {
            self.settle(record, DeploymentStatus::Failed, e.to_string(), actor)
                .await?;
            return Err(e.into());
        }

        record.status = DeploymentStatus::Initiated;
        record.reason = None;
        record.updated_at = Utc::now();
        self.deployments.update(&record).await?;

        info!(
            "Deployed job {} version {} to {}",
            record.job_id, record.version, record.environment
        );
        self.emit_deployment(actor, &record);
        Ok(record)
    }

    async fn settle(
        &self,
        mut record: DeploymentRecord,
        status: DeploymentStatus,
        reason: impl Into<String>,
        actor: &str,
    ) -> Result<DeploymentRecord, DeployError> {
        record.status = status;
        record.reason = Some(reason.into());
        record.updated_at = Utc::now();
        self.deployments.update(&record).await?;

        info!(
            "Deployment {} of job {} is {}",
            record.deployment_id, record.job_id, status
        );
        self.emit_deployment(actor, &record);
        Ok(record)
    }

    fn emit_deployment(&self, actor: &str, record: &DeploymentRecord) {
        self.observers.emit(
            actor,
            record.job_id,
            JobEventKind::DeploymentChanged {
                deployment_id: record.deployment_id,
                environment: record.environment,
                status: record.status,
            },
        );
    }
}

/// Whether a deployment armed its version at some point.
fn is_armed(record: &DeploymentRecord) -> bool {
    match record.status {
        DeploymentStatus::Initiated | DeploymentStatus::Completed => true,
        DeploymentStatus::Failed => record.first_run.is_some(),
        DeploymentStatus::InProgress | DeploymentStatus::RolledBack => false,
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
