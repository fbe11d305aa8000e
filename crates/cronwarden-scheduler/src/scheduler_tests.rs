//! Tests for the scheduling tick.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::*;
use async_trait::async_trait;
use chrono::TimeZone;
use cronwarden_deploy::MemoryDeploymentRepository;
use cronwarden_gating::{GatingConfig, InstanceTracker, SLOTS_EXHAUSTED};
use cronwarden_protocols::{
    ApprovalRequestId, ApprovalStatus, ApprovalWorkflowPort, ConcurrencyPolicy, DataDependency,
    DataDependencyOraclePort, DependencyCondition, Environment, ExecutionSpec,
    ExecutionTriggerPort, GatingSpec, JobSpec, PortError, RunState, RunUpdate, ScheduleSpec,
};
use tokio::sync::Mutex as AsyncMutex;

#[derive(Default)]
struct FakeApprovals {
    approved: AtomicBool,
}

#[async_trait]
impl ApprovalWorkflowPort for FakeApprovals {
    async fn request_approval(
        &self,
        _job_id: JobId,
        _approvers: &[String],
        _message: &str,
    ) -> Result<ApprovalRequestId, PortError> {
        Ok(ApprovalRequestId::new("req-1"))
    }

    async fn get_status(&self, _id: &ApprovalRequestId) -> Result<ApprovalStatus, PortError> {
        if self.approved.load(Ordering::SeqCst) {
            Ok(ApprovalStatus::Approved)
        } else {
            Ok(ApprovalStatus::Pending)
        }
    }
}

#[derive(Default)]
struct FakeOracle {
    ready: AsyncMutex<HashSet<String>>,
    /// Sources whose check never answers.
    hung: AsyncMutex<HashSet<String>>,
}

#[async_trait]
impl DataDependencyOraclePort for FakeOracle {
    async fn check(&self, dependency: &DataDependency) -> Result<bool, PortError> {
        if self.hung.lock().await.contains(&dependency.source) {
            return std::future::pending().await;
        }
        Ok(self.ready.lock().await.contains(&dependency.source))
    }
}

/// Runs finish instantly when `reports_completion` is set; otherwise they
/// stay running forever.
#[derive(Default)]
struct FakeExecutor {
    started: AtomicUsize,
    reports_completion: AtomicBool,
    updates: AsyncMutex<Vec<RunUpdate>>,
}

#[async_trait]
impl ExecutionTriggerPort for FakeExecutor {
    async fn trigger(
        &self,
        _job_id: JobId,
        _version: u32,
        _environment: Environment,
    ) -> Result<RunId, PortError> {
        let n = self.started.fetch_add(1, Ordering::SeqCst) + 1;
        let run_id = RunId::new(format!("run-{}", n));
        if self.reports_completion.load(Ordering::SeqCst) {
            self.updates
                .lock()
                .await
                .push(RunUpdate::new(run_id.clone(), RunState::Succeeded));
        }
        Ok(run_id)
    }

    async fn cancel(&self, _run_id: &RunId) -> Result<(), PortError> {
        Ok(())
    }

    async fn poll_updates(&self) -> Result<Vec<RunUpdate>, PortError> {
        Ok(std::mem::take(&mut *self.updates.lock().await))
    }
}

struct FakeCalendars {
    available: AtomicBool,
    hung: AtomicBool,
    dates: HolidaySet,
}

#[async_trait]
impl HolidayCalendarPort for FakeCalendars {
    async fn holidays(&self, calendar: &str) -> Result<HolidaySet, PortError> {
        if self.hung.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable(format!("{} feed down", calendar)));
        }
        Ok(self.dates.clone())
    }
}

struct Fixture {
    store: JobDefinitionStore,
    tracker: Arc<InstanceTracker>,
    approvals: Arc<FakeApprovals>,
    oracle: Arc<FakeOracle>,
    calendars: Arc<FakeCalendars>,
    executor: Arc<FakeExecutor>,
    orchestrator: DeploymentOrchestrator,
    scheduler: JobScheduler,
}

const PORT_TIMEOUT: Duration = Duration::from_millis(50);

fn fixture(config: SchedulerConfig) -> Fixture {
    let store = JobDefinitionStore::in_memory();
    let tracker = Arc::new(InstanceTracker::new());
    let approvals = Arc::new(FakeApprovals::default());
    let oracle = Arc::new(FakeOracle::default());
    let mut dates = HolidaySet::new();
    dates.insert(chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
    let calendars = Arc::new(FakeCalendars {
        available: AtomicBool::new(true),
        hung: AtomicBool::new(false),
        dates,
    });

    let gating = GatingEvaluator::new(
        store.clone(),
        tracker.clone(),
        approvals.clone(),
        oracle.clone(),
    )
    .with_config(GatingConfig::from_secs(300, 60).with_port_timeout(PORT_TIMEOUT));
    let executor = Arc::new(FakeExecutor::default());
    let orchestrator = DeploymentOrchestrator::new(
        store.clone(),
        Arc::new(MemoryDeploymentRepository::new()),
        approvals.clone(),
        executor.clone(),
        tracker.clone(),
    )
    .with_port_timeout(PORT_TIMEOUT);
    let scheduler = JobScheduler::new(
        store.clone(),
        gating,
        orchestrator.clone(),
        calendars.clone(),
    )
    .with_config(config);

    Fixture {
        store,
        tracker,
        approvals,
        oracle,
        calendars,
        executor,
        orchestrator,
        scheduler,
    }
}

fn at(day: u32, hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, hour, minute, second).unwrap()
}

fn job_spec(name: &str, expression: &str) -> JobSpec {
    JobSpec::new(name, ScheduleSpec::new(expression), ExecutionSpec::new("run.sh"))
}

async fn deployed(f: &Fixture, spec: JobSpec) -> JobId {
    let job = f.store.create(spec, "alice").await.unwrap();
    f.orchestrator
        .deploy(&job.id, 1, Environment::Production, "alice")
        .await
        .unwrap();
    job.id
}

#[tokio::test]
async fn test_first_sight_does_not_replay_past_fires() {
    let f = fixture(SchedulerConfig::default());
    let job_id = deployed(&f, job_spec("every-minute", "* * * * *")).await;

    let report = f.scheduler.tick(at(1, 9, 0, 30)).await.unwrap();
    assert!(report.triggered.is_empty());

    let report = f.scheduler.tick(at(1, 9, 1, 5)).await.unwrap();
    assert_eq!(report.triggered.len(), 1);
    assert_eq!(report.triggered[0].job_id, job_id);
    assert_eq!(report.triggered[0].fire_time, at(1, 9, 1, 0));
    assert_eq!(report.triggered[0].environment, Environment::Production);

    let report = f.scheduler.tick(at(1, 9, 1, 20)).await.unwrap();
    assert!(report.triggered.is_empty());
}

#[tokio::test]
async fn test_missed_fires_are_coalesced() {
    let f = fixture(SchedulerConfig::default());
    deployed(&f, job_spec("every-minute", "* * * * *")).await;

    f.scheduler.tick(at(1, 9, 0, 30)).await.unwrap();
    let report = f.scheduler.tick(at(1, 9, 3, 10)).await.unwrap();

    assert_eq!(report.triggered.len(), 1);
    assert_eq!(report.triggered[0].fire_time, at(1, 9, 3, 0));
    assert_eq!(report.coalesced, 2);
}

#[tokio::test]
async fn test_forbid_denies_while_running() {
    let f = fixture(SchedulerConfig::default());
    let job_id = deployed(&f, job_spec("every-minute", "* * * * *")).await;

    f.scheduler.tick(at(1, 9, 0, 30)).await.unwrap();
    f.scheduler.tick(at(1, 9, 1, 5)).await.unwrap();

    let report = f.scheduler.tick(at(1, 9, 2, 5)).await.unwrap();
    assert!(report.triggered.is_empty());
    assert_eq!(report.denied.len(), 1);
    assert_eq!(report.denied[0].job_id, job_id);
    assert_eq!(
        report.denied[0].reason,
        "1 run(s) still active and concurrency policy is Forbid"
    );

    // The denied fire is skipped; once the run ends the next one goes.
    f.orchestrator
        .report_run(&RunId::new("run-1"), RunState::Succeeded, "executor")
        .await
        .unwrap();
    let report = f.scheduler.tick(at(1, 9, 3, 5)).await.unwrap();
    assert_eq!(report.triggered.len(), 1);
    assert_eq!(report.triggered[0].fire_time, at(1, 9, 3, 0));
}

/// Fires per tick of a Forbid job ticked at second 5 of minutes 0..=4.
async fn fires_per_minute(f: &Fixture) -> Vec<usize> {
    let mut fired = Vec::new();
    for minute in 0..5 {
        let report = f.scheduler.tick(at(1, 9, minute, 5)).await.unwrap();
        fired.push(report.triggered.len());
    }
    fired
}

#[tokio::test]
async fn test_forbid_job_fires_every_minute_when_runs_finish() {
    let f = fixture(SchedulerConfig::default());
    f.executor.reports_completion.store(true, Ordering::SeqCst);
    deployed(&f, job_spec("every-minute", "* * * * *")).await;

    assert_eq!(fires_per_minute(&f).await, vec![0, 1, 1, 1, 1]);
}

#[tokio::test]
async fn test_forbid_job_stays_denied_while_runs_never_finish() {
    let f = fixture(SchedulerConfig::default());
    let job_id = deployed(&f, job_spec("every-minute", "* * * * *")).await;

    assert_eq!(fires_per_minute(&f).await, vec![0, 1, 0, 0, 0]);
    assert_eq!(f.tracker.running(&job_id), vec![RunId::new("run-1")]);
}

#[tokio::test]
async fn test_hung_oracle_defers_only_its_job() {
    let f = fixture(SchedulerConfig::default());
    let gating = GatingSpec {
        data_dependencies: vec![DataDependency::new(
            "/data/slow.csv",
            DependencyCondition::FileExists,
        )],
        ..GatingSpec::default()
    };
    let slow = deployed(&f, job_spec("slow", "* * * * *").with_gating(gating)).await;
    let healthy = deployed(&f, job_spec("healthy", "* * * * *")).await;
    f.oracle.hung.lock().await.insert("/data/slow.csv".to_string());

    f.scheduler.tick(at(1, 9, 0, 30)).await.unwrap();
    let report = tokio::time::timeout(Duration::from_secs(2), f.scheduler.tick(at(1, 9, 1, 5)))
        .await
        .expect("tick must not wait on a hung oracle")
        .unwrap();

    assert_eq!(report.triggered.len(), 1);
    assert_eq!(report.triggered[0].job_id, healthy);
    assert_eq!(report.deferred.len(), 1);
    assert_eq!(report.deferred[0].job_id, slow);
    assert_eq!(report.deferred[0].retry_after, at(1, 9, 2, 5));
    assert!(report.deferred[0].reason.contains("timed out"));
}

#[tokio::test]
async fn test_hung_calendar_defers_only_its_job() {
    let f = fixture(SchedulerConfig::default());
    let spec = JobSpec::new(
        "calendared",
        ScheduleSpec::new("* * * * *").with_holiday_calendar("bank"),
        ExecutionSpec::new("run.sh"),
    );
    let calendared = deployed(&f, spec).await;
    let healthy = deployed(&f, job_spec("healthy", "* * * * *")).await;

    f.scheduler.tick(at(1, 9, 0, 30)).await.unwrap();
    f.calendars.hung.store(true, Ordering::SeqCst);
    let report = tokio::time::timeout(Duration::from_secs(2), f.scheduler.tick(at(1, 9, 1, 5)))
        .await
        .expect("tick must not wait on a hung calendar")
        .unwrap();

    assert_eq!(report.triggered.len(), 1);
    assert_eq!(report.triggered[0].job_id, healthy);
    assert_eq!(report.deferred.len(), 1);
    assert_eq!(report.deferred[0].job_id, calendared);
    assert_eq!(report.deferred[0].retry_after, at(1, 9, 1, 20));
    assert!(report.deferred[0].reason.contains("timed out"));
}

#[tokio::test]
async fn test_replace_cancels_running_instance() {
    let f = fixture(SchedulerConfig::default());
    let mut spec = job_spec("every-minute", "* * * * *");
    spec.execution.concurrency_policy = ConcurrencyPolicy::Replace;
    let job_id = deployed(&f, spec).await;

    f.scheduler.tick(at(1, 9, 0, 30)).await.unwrap();
    f.scheduler.tick(at(1, 9, 1, 5)).await.unwrap();
    let report = f.scheduler.tick(at(1, 9, 2, 5)).await.unwrap();

    assert_eq!(report.cancelled, vec![RunId::new("run-1")]);
    assert_eq!(report.triggered.len(), 1);
    assert_eq!(report.triggered[0].run_id, RunId::new("run-2"));
    assert_eq!(f.tracker.running(&job_id), vec![RunId::new("run-2")]);
}

#[tokio::test]
async fn test_unmet_dependency_parks_until_retry() {
    let f = fixture(SchedulerConfig::default());
    let gating = GatingSpec {
        data_dependencies: vec![DataDependency::new(
            "/data/export.csv",
            DependencyCondition::FileExists,
        )],
        ..GatingSpec::default()
    };
    let job_id = deployed(&f, job_spec("nine-am", "0 9 * * *").with_gating(gating)).await;

    f.scheduler.tick(at(1, 8, 59, 0)).await.unwrap();
    let report = f.scheduler.tick(at(1, 9, 0, 10)).await.unwrap();
    assert_eq!(report.deferred.len(), 1);
    assert_eq!(report.deferred[0].job_id, job_id);
    assert_eq!(report.deferred[0].retry_after, at(1, 9, 1, 10));
    assert!(report.deferred[0].reason.starts_with("unmet dependencies"));

    let report = f.scheduler.tick(at(1, 9, 0, 40)).await.unwrap();
    assert_eq!(report.parked, 1);
    assert_eq!(report.evaluated, 0);

    f.oracle
        .ready
        .lock()
        .await
        .insert("/data/export.csv".to_string());
    let report = f.scheduler.tick(at(1, 9, 1, 15)).await.unwrap();
    assert_eq!(report.triggered.len(), 1);
    assert_eq!(report.triggered[0].fire_time, at(1, 9, 0, 0));
}

#[tokio::test]
async fn test_slots_go_to_higher_priority() {
    let config = SchedulerConfig::default().with_max_concurrent_triggers(1);
    let f = fixture(config);
    let low = deployed(
        &f,
        job_spec("low", "* * * * *").with_gating(GatingSpec {
            queue_priority: 10,
            ..GatingSpec::default()
        }),
    )
    .await;
    let high = deployed(
        &f,
        job_spec("high", "* * * * *").with_gating(GatingSpec {
            queue_priority: 90,
            ..GatingSpec::default()
        }),
    )
    .await;

    f.scheduler.tick(at(1, 9, 0, 30)).await.unwrap();
    let report = f.scheduler.tick(at(1, 9, 1, 0)).await.unwrap();

    assert_eq!(report.triggered.len(), 1);
    assert_eq!(report.triggered[0].job_id, high);
    assert_eq!(report.deferred.len(), 1);
    assert_eq!(report.deferred[0].job_id, low);
    assert_eq!(report.deferred[0].reason, SLOTS_EXHAUSTED);
    assert_eq!(report.deferred[0].retry_after, at(1, 9, 1, 15));

    // The loser keeps its fire and wins the next tick.
    let report = f.scheduler.tick(at(1, 9, 1, 15)).await.unwrap();
    assert_eq!(report.triggered.len(), 1);
    assert_eq!(report.triggered[0].job_id, low);
    assert_eq!(report.triggered[0].fire_time, at(1, 9, 1, 0));
}

#[tokio::test]
async fn test_holidays_are_skipped() {
    let f = fixture(SchedulerConfig::default());
    let spec = JobSpec::new(
        "daily",
        ScheduleSpec::new("0 6 * * *").with_holiday_calendar("bank"),
        ExecutionSpec::new("run.sh"),
    );
    deployed(&f, spec).await;

    f.scheduler.tick(at(1, 7, 0, 0)).await.unwrap();
    // 2024-01-02 is a holiday.
    let report = f.scheduler.tick(at(2, 7, 0, 0)).await.unwrap();
    assert!(report.triggered.is_empty());

    let report = f.scheduler.tick(at(3, 6, 0, 5)).await.unwrap();
    assert_eq!(report.triggered.len(), 1);
    assert_eq!(report.triggered[0].fire_time, at(3, 6, 0, 0));
}

#[tokio::test]
async fn test_calendar_failure_defers_to_next_tick() {
    let f = fixture(SchedulerConfig::default());
    let spec = JobSpec::new(
        "daily",
        ScheduleSpec::new("0 6 * * *").with_holiday_calendar("bank"),
        ExecutionSpec::new("run.sh"),
    );
    let job_id = deployed(&f, spec).await;
    f.calendars.available.store(false, Ordering::SeqCst);

    let report = f.scheduler.tick(at(1, 5, 0, 0)).await.unwrap();
    assert_eq!(report.deferred.len(), 1);
    assert_eq!(report.deferred[0].job_id, job_id);
    assert_eq!(report.deferred[0].retry_after, at(1, 5, 0, 15));
    assert!(report.deferred[0].reason.contains("holiday calendar 'bank'"));

    f.calendars.available.store(true, Ordering::SeqCst);
    let report = f.scheduler.tick(at(1, 6, 0, 5)).await.unwrap();
    assert_eq!(report.triggered.len(), 1);
}

#[tokio::test]
async fn test_paused_job_does_not_replay_on_resume() {
    let f = fixture(SchedulerConfig::default());
    let job_id = deployed(&f, job_spec("every-minute", "* * * * *")).await;

    f.scheduler.tick(at(1, 9, 0, 30)).await.unwrap();
    f.store.pause(&job_id, "alice").await.unwrap();
    let report = f.scheduler.tick(at(1, 9, 5, 0)).await.unwrap();
    assert!(report.is_idle());

    f.store.resume(&job_id, "alice").await.unwrap();
    let report = f.scheduler.tick(at(1, 9, 10, 30)).await.unwrap();
    assert!(report.triggered.is_empty());
    let report = f.scheduler.tick(at(1, 9, 11, 0)).await.unwrap();
    assert_eq!(report.triggered.len(), 1);
    assert_eq!(report.triggered[0].fire_time, at(1, 9, 11, 0));
}

#[tokio::test]
async fn test_tick_resumes_approved_deployments() {
    let f = fixture(SchedulerConfig::default());
    let gating = GatingSpec {
        manual_approval_required: true,
        approvers: vec!["ops".to_string()],
        ..GatingSpec::default()
    };
    let job = f
        .store
        .create(job_spec("gated", "* * * * *").with_gating(gating), "alice")
        .await
        .unwrap();
    f.orchestrator
        .deploy(&job.id, 1, Environment::Production, "alice")
        .await
        .unwrap();

    let report = f.scheduler.tick(at(1, 9, 0, 30)).await.unwrap();
    assert_eq!(report.resumed, 0);
    assert_eq!(
        f.store.get(&job.id).await.unwrap().status,
        LifecycleStatus::Draft
    );

    f.approvals.approved.store(true, Ordering::SeqCst);
    let report = f.scheduler.tick(at(1, 9, 0, 45)).await.unwrap();
    assert_eq!(report.resumed, 1);
    assert_eq!(
        f.store.get(&job.id).await.unwrap().status,
        LifecycleStatus::Scheduled
    );

    let report = f.scheduler.tick(at(1, 9, 1, 5)).await.unwrap();
    assert_eq!(report.triggered.len(), 1);
}

#[tokio::test]
async fn test_scheduler_shutdown() {
    let f = fixture(SchedulerConfig::default().with_tick_interval(Duration::from_millis(50)));
    let scheduler = Arc::new(f.scheduler);
    let (tx, rx) = watch::channel(false);

    let handle = tokio::spawn(scheduler.clone().run(rx));
    tokio::time::sleep(Duration::from_millis(120)).await;
    tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("Scheduler should shut down promptly")
        .expect("Scheduler task should not panic");
}
