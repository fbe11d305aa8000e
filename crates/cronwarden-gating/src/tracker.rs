//! Running instance tracking.

use chrono::{DateTime, Utc};
use cronwarden_protocols::{JobId, RunId, RunInstance, RunState};
use dashmap::DashMap;
use tracing::debug;

/// Triggered runs and their last reported state.
///
/// Only `Running` instances count for concurrency policies.
#[derive(Debug, Default)]
pub struct InstanceTracker {
    runs: DashMap<RunId, RunInstance>,
}

impl InstanceTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly triggered run.
    pub fn record(&self, run: RunInstance) {
        debug!("Tracking run {} of job {}", run.run_id, run.job_id);
        self.runs.insert(run.run_id.clone(), run);
    }

    /// Record a reported state. Returns the updated run, if known.
    pub fn report(&self, run_id: &RunId, state: RunState) -> Option<RunInstance> {
        let mut run = self.runs.get_mut(run_id)?;
        run.state = state;
        run.updated_at = Utc::now();
        Some(run.clone())
    }

    pub fn get(&self, run_id: &RunId) -> Option<RunInstance> {
        self.runs.get(run_id).map(|r| r.clone())
    }

    /// Ids of the job's `Running` instances, in start order.
    pub fn running(&self, job_id: &JobId) -> Vec<RunId> {
        let mut running: Vec<_> = self
            .runs
            .iter()
            .filter(|r| r.job_id == *job_id && r.state == RunState::Running)
            .map(|r| (r.started_at, r.run_id.clone()))
            .collect();
        running.sort();
        running.into_iter().map(|(_, id)| id).collect()
    }

    /// Every tracked run of a job, oldest first.
    pub fn runs_for(&self, job_id: &JobId) -> Vec<RunInstance> {
        let mut runs: Vec<_> = self
            .runs
            .iter()
            .filter(|r| r.job_id == *job_id)
            .map(|r| r.clone())
            .collect();
        runs.sort_by_key(|r| r.started_at);
        runs
    }

    /// Forget finished runs last updated before `before`.
    pub fn prune_finished(&self, before: DateTime<Utc>) -> usize {
        let len = self.runs.len();
        self.runs
            .retain(|_, r| !(r.state.is_terminal() && r.updated_at < before));
        len - self.runs.len()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}
