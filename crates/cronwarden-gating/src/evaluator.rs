//! Gating evaluator.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use cronwarden_protocols::{
    bounded, ApprovalStatus, ApprovalWorkflowPort, ConcurrencyPolicy, DataDependency,
    DataDependencyOraclePort, Decision, JobDefinition, JobId, LifecycleStatus,
};
use cronwarden_store::JobDefinitionStore;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::config::GatingConfig;
use crate::error::GatingError;
use crate::tracker::InstanceTracker;

/// Gates proposed fire times.
///
/// Holds no mutable state of its own; safe to call concurrently for many
/// jobs.
#[derive(Clone)]
pub struct GatingEvaluator {
    store: JobDefinitionStore,
    tracker: Arc<InstanceTracker>,
    approvals: Arc<dyn ApprovalWorkflowPort>,
    oracle: Arc<dyn DataDependencyOraclePort>,
    config: GatingConfig,
}

impl GatingEvaluator {
    /// Create a new evaluator with default config.
    pub fn new(
        store: JobDefinitionStore,
        tracker: Arc<InstanceTracker>,
        approvals: Arc<dyn ApprovalWorkflowPort>,
        oracle: Arc<dyn DataDependencyOraclePort>,
    ) -> Self {
        Self {
            store,
            tracker,
            approvals,
            oracle,
            config: GatingConfig::default(),
        }
    }

    /// Set the config.
    pub fn with_config(mut self, config: GatingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &GatingConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<InstanceTracker> {
        &self.tracker
    }

    /// Gate `fire_time` of a job, evaluated now.
    pub async fn evaluate(
        &self,
        job_id: &JobId,
        fire_time: DateTime<Utc>,
    ) -> Result<Decision, GatingError> {
        self.evaluate_at(job_id, fire_time, Utc::now()).await
    }

    /// Gate `fire_time` of a job as of `now`.
    ///
    /// Defers are scheduled from the later of `fire_time` and `now`.
    pub async fn evaluate_at(
        &self,
        job_id: &JobId,
        fire_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Decision, GatingError> {
        let job = self.store.get(job_id).await?;
        let base = fire_time.max(now);
        let decision = self.decide(&job, base).await;
        debug!("Gating job {} at {}: {}", job_id, fire_time, decision);
        Ok(decision)
    }

    async fn decide(&self, job: &JobDefinition, base: DateTime<Utc>) -> Decision {
        if job.status != LifecycleStatus::Scheduled {
            return Decision::deny("not scheduled");
        }

        if job.spec.gating.manual_approval_required {
            if let Some(defer) = self.check_approval(job, base).await {
                return defer;
            }
        }

        let running = self.tracker.running(&job.id);
        let replace = match job.spec.execution.concurrency_policy {
            ConcurrencyPolicy::Forbid if !running.is_empty() => {
                return Decision::deny(format!(
                    "{} run(s) still active and concurrency policy is Forbid",
                    running.len()
                ));
            }
            ConcurrencyPolicy::Replace => running,
            _ => Vec::new(),
        };

        if let Some(defer) = self.check_dependencies(job, base).await {
            return defer;
        }

        Decision::Allow { replace }
    }

    /// `None` when the head version is approved.
    async fn check_approval(&self, job: &JobDefinition, base: DateTime<Utc>) -> Option<Decision> {
        let retry_after = self.config.approval_retry_after(base);
        let Some(approval) = job.approval_for(job.current_version) else {
            return Some(Decision::defer(
                retry_after,
                format!("awaiting approval of version {}", job.current_version),
            ));
        };

        let status = bounded(
            self.config.port_timeout,
            "approval status",
            self.approvals.get_status(&approval.request_id),
        )
        .await;
        match status {
            Ok(ApprovalStatus::Approved) => None,
            Ok(ApprovalStatus::Pending) => Some(Decision::defer(
                retry_after,
                format!("approval {} is pending", approval.request_id),
            )),
            Ok(ApprovalStatus::Rejected) => Some(Decision::defer(
                retry_after,
                format!("approval {} was rejected", approval.request_id),
            )),
            Err(e) => {
                warn!("Approval status of job {} unavailable: {}", job.id, e);
                Some(Decision::defer(
                    self.config.dependency_retry_after(base),
                    format!("approval workflow unavailable: {}", e),
                ))
            }
        }
    }

    /// `None` when every dependency holds. Checks run concurrently.
    async fn check_dependencies(
        &self,
        job: &JobDefinition,
        base: DateTime<Utc>,
    ) -> Option<Decision> {
        let dependencies = &job.spec.gating.data_dependencies;
        if dependencies.is_empty() {
            return None;
        }

        let timeout = self.config.port_timeout;
        let results = join_all(
            dependencies
                .iter()
                .map(|d| bounded(timeout, "dependency check", self.oracle.check(d))),
        )
        .await;

        let mut unmet: Vec<&DataDependency> = Vec::new();
        let mut failures = Vec::new();
        for (dependency, result) in dependencies.iter().zip(results) {
            match result {
                Ok(true) => {}
                Ok(false) => unmet.push(dependency),
                Err(e) => {
                    warn!(
                        "Dependency check {} for job {} failed: {}",
                        dependency, job.id, e
                    );
                    failures.push(format!("{} ({})", dependency, e));
                }
            }
        }

        let retry_after = self.config.dependency_retry_after(base);
        if !failures.is_empty() {
            return Some(Decision::defer(
                retry_after,
                format!("dependency check unavailable: {}", failures.join(", ")),
            ));
        }
        if !unmet.is_empty() {
            let names: Vec<String> = unmet.iter().map(|d| d.to_string()).collect();
            return Some(Decision::defer(
                retry_after,
                format!("unmet dependencies: {}", names.join(", ")),
            ));
        }
        None
    }
}

#[cfg(test)]
#[path = "evaluator_tests.rs"]
mod tests;
