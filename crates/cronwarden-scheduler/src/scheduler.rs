//! Job scheduler that fires due jobs on a periodic tick.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use cronwarden_deploy::DeploymentOrchestrator;
use cronwarden_gating::{arbitrate, Candidate, GatingEvaluator};
use cronwarden_protocols::{
    bounded, Decision, HolidayCalendarPort, JobDefinition, JobId, LifecycleStatus, RunId, RunInstance,
};
use cronwarden_schedule::{HolidaySet, ScheduleExpression};
use cronwarden_store::{parse_schedule, JobDefinitionStore, JobFilter};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;

/// Finished runs are kept this long for concurrency bookkeeping.
const FINISHED_RUN_RETENTION_HOURS: i64 = 24;

/// Per-job scan position.
#[derive(Debug, Clone, Copy)]
struct Cursor {
    /// Fires at or before this instant are done.
    after: DateTime<Utc>,
    /// Skip the job until this instant.
    parked_until: Option<DateTime<Utc>>,
}

/// Where a job stands at the start of a tick.
enum Due {
    /// Nothing to fire yet.
    Idle,
    /// An earlier defer has not expired.
    Parked,
    Fire {
        at: DateTime<Utc>,
        coalesced: usize,
    },
    Deferred(Deferral),
}

/// A fire that did not run and will be retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deferral {
    pub job_id: JobId,
    /// The deferred fire, or the scan position when the fire is not known
    /// yet.
    pub fire_time: DateTime<Utc>,
    pub retry_after: DateTime<Utc>,
    pub reason: String,
}

/// A fire that was skipped for good.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub job_id: JobId,
    pub fire_time: DateTime<Utc>,
    pub reason: String,
}

/// What one tick did.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Approval-pending deployments whose status changed.
    pub resumed: usize,
    /// Run state changes pulled from the execution system.
    pub run_updates: usize,
    /// Jobs whose due fire went through gating.
    pub evaluated: usize,
    pub triggered: Vec<RunInstance>,
    pub cancelled: Vec<RunId>,
    pub denied: Vec<Denial>,
    pub deferred: Vec<Deferral>,
    /// Jobs skipped because an earlier defer has not expired yet.
    pub parked: usize,
    /// Older due fires folded into a later one.
    pub coalesced: usize,
}

impl TickReport {
    /// Whether the tick changed anything.
    pub fn is_idle(&self) -> bool {
        self.resumed == 0
            && self.run_updates == 0
            && self.evaluated == 0
            && self.triggered.is_empty()
            && self.deferred.is_empty()
    }
}

/// Periodically fires due jobs through gating and the orchestrator.
pub struct JobScheduler {
    store: JobDefinitionStore,
    gating: GatingEvaluator,
    orchestrator: DeploymentOrchestrator,
    calendars: Arc<dyn HolidayCalendarPort>,
    config: SchedulerConfig,
    cursors: Mutex<HashMap<JobId, Cursor>>,
}

impl JobScheduler {
    /// Create a new job scheduler.
    pub fn new(
        store: JobDefinitionStore,
        gating: GatingEvaluator,
        orchestrator: DeploymentOrchestrator,
        calendars: Arc<dyn HolidayCalendarPort>,
    ) -> Self {
        Self {
            store,
            gating,
            orchestrator,
            calendars,
            config: SchedulerConfig::default(),
            cursors: Mutex::new(HashMap::new()),
        }
    }

    /// Set the config.
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Start the scheduler loop. Runs until the shutdown channel changes.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        info!(
            "Job scheduler started (tick interval: {:?}, slots: {})",
            self.config.tick_interval, self.config.max_concurrent_triggers
        );

        let mut interval = time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        let mut shutdown = shutdown;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick(Utc::now()).await {
                        Ok(report) if report.is_idle() => debug!("Tick idle"),
                        Ok(report) => info!(
                            "Tick: {} triggered, {} deferred, {} denied, {} resumed",
                            report.triggered.len(),
                            report.deferred.len(),
                            report.denied.len(),
                            report.resumed
                        ),
                        Err(e) => error!("Scheduler tick failed: {}", e),
                    }
                }
                _ = shutdown.changed() => {
                    info!("Job scheduler shutting down");
                    break;
                }
            }
        }
    }

    /// Run one scheduling pass as of `now`.
    ///
    /// Collaborator calls are bounded by the gating port timeout, so a hung
    /// collaborator defers only the jobs that depend on it.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, SchedulerError> {
        let mut report = TickReport::default();

        match self.orchestrator.resume_pending().await {
            Ok(changed) => report.resumed = changed.len(),
            Err(e) => warn!("Failed to resume pending deployments: {}", e),
        }

        // Finished runs are recorded before concurrency policies look at them.
        match self.orchestrator.collect_run_updates().await {
            Ok(runs) => report.run_updates = runs.len(),
            Err(e) => warn!("Failed to collect run updates: {}", e),
        }

        let jobs = self
            .store
            .list(&JobFilter::new().with_status(LifecycleStatus::Scheduled))
            .await?;
        self.forget_unscheduled(&jobs);

        // Calendar lookups run concurrently so one slow calendar only
        // delays its own job.
        let outcomes = join_all(jobs.iter().map(|job| self.due_fire(job, now))).await;
        let mut due = Vec::new();
        for (job, outcome) in jobs.into_iter().zip(outcomes) {
            match outcome {
                Due::Idle => {}
                Due::Parked => report.parked += 1,
                Due::Fire { at, coalesced } => {
                    report.coalesced += coalesced;
                    due.push((job, at));
                }
                Due::Deferred(deferral) => self.defer(
                    &mut report,
                    deferral.job_id,
                    deferral.fire_time,
                    deferral.retry_after,
                    deferral.reason,
                ),
            }
        }

        let decisions = join_all(
            due.iter()
                .map(|(job, fire_time)| self.gating.evaluate_at(&job.id, *fire_time, now)),
        )
        .await;
        report.evaluated = due.len();

        let mut allowed = HashMap::new();
        let mut candidates = Vec::new();
        for ((job, fire_time), decision) in due.into_iter().zip(decisions) {
            match decision {
                Ok(Decision::Allow { replace }) => {
                    candidates.push(Candidate {
                        job_id: job.id,
                        queue_priority: job.spec.gating.queue_priority,
                        fire_time,
                        replace,
                    });
                    allowed.insert(job.id, job);
                }
                Ok(Decision::Deny { reason }) => {
                    info!("Skipping fire of job {} at {}: {}", job.id, fire_time, reason);
                    self.advance(&job.id, fire_time);
                    report.denied.push(Denial {
                        job_id: job.id,
                        fire_time,
                        reason,
                    });
                }
                Ok(Decision::Defer {
                    retry_after,
                    reason,
                }) => {
                    self.defer(&mut report, job.id, fire_time, retry_after, reason);
                }
                Err(e) => warn!("Gating failed for job {}: {}", job.id, e),
            }
        }

        let retry_after = later(now, self.config.tick_interval);
        let arbitration = arbitrate(candidates, self.config.max_concurrent_triggers, retry_after);
        for (candidate, decision) in arbitration.deferred {
            if let Decision::Defer {
                retry_after,
                reason,
            } = decision
            {
                self.defer(
                    &mut report,
                    candidate.job_id,
                    candidate.fire_time,
                    retry_after,
                    reason,
                );
            }
        }

        for candidate in arbitration.admitted {
            let Some(job) = allowed.get(&candidate.job_id) else {
                continue;
            };
            self.fire(job, candidate, now, &mut report).await;
        }

        let pruned = self
            .gating
            .tracker()
            .prune_finished(now - TimeDelta::hours(FINISHED_RUN_RETENTION_HOURS));
        if pruned > 0 {
            debug!("Pruned {} finished runs", pruned);
        }

        Ok(report)
    }

    /// The fire time of `job` that should run now, if any.
    async fn due_fire(&self, job: &JobDefinition, now: DateTime<Utc>) -> Due {
        let cursor = *self.cursors.lock().entry(job.id).or_insert_with(|| {
            debug!("Job {} armed, scanning fires after {}", job.id, now);
            Cursor {
                after: now,
                parked_until: None,
            }
        });

        if cursor.parked_until.is_some_and(|until| until > now) {
            return Due::Parked;
        }

        let expression = match parse_schedule(&job.spec.schedule) {
            Ok(expression) => expression,
            Err(e) => {
                warn!("Job {} has an invalid schedule: {}", job.id, e);
                return Due::Idle;
            }
        };

        let holidays = match self.holidays(&expression).await {
            Ok(holidays) => holidays,
            Err(reason) => {
                return Due::Deferred(Deferral {
                    job_id: job.id,
                    fire_time: cursor.after,
                    retry_after: later(now, self.config.tick_interval),
                    reason,
                });
            }
        };

        let horizon = self.config.search_horizon_days;
        let mut fire = match expression.next_fire_time_within(cursor.after, &holidays, horizon) {
            Ok(fire) if fire <= now => fire,
            Ok(_) => return Due::Idle,
            Err(e) => {
                debug!("Job {} has no upcoming fire: {}", job.id, e);
                return Due::Idle;
            }
        };

        let mut coalesced = 0;
        while let Ok(next) = expression.next_fire_time_within(fire, &holidays, horizon) {
            if next > now {
                break;
            }
            coalesced += 1;
            fire = next;
        }
        Due::Fire {
            at: fire,
            coalesced,
        }
    }

    async fn holidays(&self, expression: &ScheduleExpression) -> Result<HolidaySet, String> {
        let Some(calendar) = expression.holiday_calendar() else {
            return Ok(HolidaySet::new());
        };
        let timeout = self.gating.config().port_timeout;
        bounded(timeout, "holiday calendar", self.calendars.holidays(calendar))
            .await
            .map_err(|e| {
                warn!("Holiday calendar '{}' unavailable: {}", calendar, e);
                format!("holiday calendar '{}' unavailable: {}", calendar, e)
            })
    }

    async fn fire(
        &self,
        job: &JobDefinition,
        candidate: Candidate,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        if !candidate.replace.is_empty() {
            let cancelled = self
                .orchestrator
                .cancel_runs(&job.id, &candidate.replace)
                .await;
            report.cancelled.extend(cancelled);
        }

        match self.orchestrator.trigger(job, candidate.fire_time).await {
            Ok(run) => {
                self.advance(&job.id, candidate.fire_time);
                report.triggered.push(run);
            }
            Err(e) => {
                warn!("Failed to trigger job {}: {}", job.id, e);
                let retry_after = later(now, self.gating.config().dependency_retry);
                self.defer(
                    report,
                    job.id,
                    candidate.fire_time,
                    retry_after,
                    format!("execution trigger failed: {}", e),
                );
            }
        }
    }

    fn advance(&self, job_id: &JobId, fire_time: DateTime<Utc>) {
        if let Some(cursor) = self.cursors.lock().get_mut(job_id) {
            cursor.after = fire_time;
            cursor.parked_until = None;
        }
    }

    fn defer(
        &self,
        report: &mut TickReport,
        job_id: JobId,
        fire_time: DateTime<Utc>,
        retry_after: DateTime<Utc>,
        reason: String,
    ) {
        debug!(
            "Deferring job {} fire {} until {}: {}",
            job_id, fire_time, retry_after, reason
        );
        if let Some(cursor) = self.cursors.lock().get_mut(&job_id) {
            cursor.parked_until = Some(retry_after);
        }
        report.deferred.push(Deferral {
            job_id,
            fire_time,
            retry_after,
            reason,
        });
    }

    /// Drop cursors of jobs that are no longer scheduled.
    fn forget_unscheduled(&self, jobs: &[JobDefinition]) {
        let scheduled: HashSet<JobId> = jobs.iter().map(|j| j.id).collect();
        self.cursors.lock().retain(|id, _| {
            let keep = scheduled.contains(id);
            if !keep {
                debug!("Job {} disarmed", id);
            }
            keep
        });
    }
}

fn later(base: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    let delta = TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX);
    base.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
