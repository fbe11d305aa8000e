//! Local adapters for the collaborator ports.
//!
//! These back a single-host installation: approvals are JSON files resolved
//! with the `approval` command, data dependencies are checked on the local
//! filesystem and triggered runs are child processes.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use cronwarden_config::CalendarConfig;
use cronwarden_protocols::{
    ApprovalRequestId, ApprovalStatus, ApprovalWorkflowPort, AuditEntry, AuditLogPort,
    DataDependency, DataDependencyOraclePort, DependencyCondition, Environment, ExecutionSpec,
    ExecutionTriggerPort, HolidayCalendarPort, JobEvent, JobId, NotificationPort, PortError,
    RunId, RunState, RunUpdate,
};
use cronwarden_schedule::HolidaySet;
use cronwarden_store::JobDefinitionStore;

/// Holiday calendars declared in the `[calendars]` config section.
pub(crate) struct ConfigHolidayCalendar {
    calendars: BTreeMap<String, HolidaySet>,
}

impl ConfigHolidayCalendar {
    pub(crate) fn new(calendars: &BTreeMap<String, CalendarConfig>) -> Self {
        Self {
            calendars: calendars
                .iter()
                .map(|(name, c)| (name.clone(), c.dates.clone()))
                .collect(),
        }
    }

    /// Resolve a calendar outside the async port, for one-shot commands.
    pub(crate) fn get(&self, calendar: &str) -> Option<&HolidaySet> {
        self.calendars.get(calendar)
    }
}

#[async_trait]
impl HolidayCalendarPort for ConfigHolidayCalendar {
    async fn holidays(&self, calendar: &str) -> Result<HolidaySet, PortError> {
        self.get(calendar)
            .cloned()
            .ok_or_else(|| PortError::Rejected(format!("unknown holiday calendar '{}'", calendar)))
    }
}

/// One approval request as stored in the inbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApprovalRecord {
    pub request_id: ApprovalRequestId,
    pub job_id: JobId,
    pub approvers: Vec<String>,
    pub message: String,
    pub status: ApprovalStatus,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_by: Option<String>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Approval workflow backed by one JSON file per request.
pub(crate) struct FileApprovalInbox {
    path: PathBuf,
}

impl FileApprovalInbox {
    pub(crate) async fn new(path: impl Into<PathBuf>) -> Result<Self, std::io::Error> {
        let path = path.into();
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self { path })
    }

    fn request_path(&self, id: &ApprovalRequestId) -> PathBuf {
        self.path.join(format!("{}.json", id))
    }

    /// Every request, oldest first.
    pub(crate) async fn list(&self) -> Result<Vec<ApprovalRecord>, PortError> {
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.path).await.map_err(unavailable)?;
        while let Some(entry) = entries.next_entry().await.map_err(unavailable)? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                match read_record(&path).await {
                    Ok(record) => records.push(record),
                    Err(e) => warn!("Skipping approval file {}: {}", path.display(), e),
                }
            }
        }
        records.sort_by_key(|r| r.requested_at);
        Ok(records)
    }

    /// Approve or reject a pending request.
    pub(crate) async fn resolve(
        &self,
        id: &ApprovalRequestId,
        status: ApprovalStatus,
        actor: &str,
    ) -> Result<ApprovalRecord, PortError> {
        let mut record = read_record(&self.request_path(id)).await?;
        if record.status != ApprovalStatus::Pending {
            return Err(PortError::Rejected(format!(
                "approval {} is already {:?}",
                id, record.status
            )));
        }
        if !record.approvers.is_empty() && !record.approvers.iter().any(|a| a == actor) {
            return Err(PortError::Rejected(format!(
                "{} is not an approver of {}",
                actor, id
            )));
        }

        record.status = status;
        record.resolved_by = Some(actor.to_string());
        record.resolved_at = Some(Utc::now());
        self.write(&record).await?;
        info!("Approval {} resolved as {:?} by {}", id, status, actor);
        Ok(record)
    }

    async fn write(&self, record: &ApprovalRecord) -> Result<(), PortError> {
        let path = self.request_path(&record.request_id);
        let tmp = path.with_extension("json.tmp");
        let content =
            serde_json::to_string_pretty(record).map_err(|e| PortError::Other(e.to_string()))?;
        tokio::fs::write(&tmp, content).await.map_err(unavailable)?;
        tokio::fs::rename(&tmp, &path).await.map_err(unavailable)?;
        Ok(())
    }
}

#[async_trait]
impl ApprovalWorkflowPort for FileApprovalInbox {
    async fn request_approval(
        &self,
        job_id: JobId,
        approvers: &[String],
        message: &str,
    ) -> Result<ApprovalRequestId, PortError> {
        let record = ApprovalRecord {
            request_id: ApprovalRequestId::new(format!("apr-{}", Uuid::new_v4().simple())),
            job_id,
            approvers: approvers.to_vec(),
            message: message.to_string(),
            status: ApprovalStatus::Pending,
            requested_at: Utc::now(),
            resolved_by: None,
            resolved_at: None,
        };
        self.write(&record).await?;
        info!(
            "Approval {} requested from [{}]: {}",
            record.request_id,
            approvers.join(", "),
            message
        );
        Ok(record.request_id)
    }

    async fn get_status(&self, request_id: &ApprovalRequestId) -> Result<ApprovalStatus, PortError> {
        Ok(read_record(&self.request_path(request_id)).await?.status)
    }
}

async fn read_record(path: &Path) -> Result<ApprovalRecord, PortError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PortError::Rejected(format!(
                "no approval request at {}",
                path.display()
            )));
        }
        Err(e) => return Err(unavailable(e)),
    };
    serde_json::from_str(&content).map_err(|e| PortError::Other(e.to_string()))
}

fn unavailable(e: std::io::Error) -> PortError {
    PortError::Unavailable(e.to_string())
}

/// Checks data dependencies against the local filesystem.
///
/// `source` is a path. Row counts need a database and are reported
/// unavailable.
#[derive(Debug, Default)]
pub(crate) struct LocalDataOracle;

#[async_trait]
impl DataDependencyOraclePort for LocalDataOracle {
    async fn check(&self, dependency: &DataDependency) -> Result<bool, PortError> {
        debug!("Checking dependency {}", dependency);
        let path = Path::new(&dependency.source);
        match dependency.condition {
            DependencyCondition::FileExists => {
                tokio::fs::try_exists(path).await.map_err(unavailable)
            }
            DependencyCondition::LastModifiedAfterDate => {
                let threshold = dependency
                    .value
                    .as_deref()
                    .ok_or_else(|| PortError::Rejected(format!("{} has no date", dependency)))
                    .and_then(parse_threshold)?;
                let modified = match tokio::fs::metadata(path).await {
                    Ok(metadata) => metadata.modified().map_err(unavailable)?,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
                    Err(e) => return Err(unavailable(e)),
                };
                Ok(DateTime::<Utc>::from(modified) > threshold)
            }
            DependencyCondition::RowCountGreaterThanZero => Err(PortError::Unavailable(format!(
                "no row count source for {}",
                dependency.source
            ))),
        }
    }
}

/// Accepts RFC 3339 timestamps or plain dates (midnight UTC).
fn parse_threshold(value: &str) -> Result<DateTime<Utc>, PortError> {
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
        .ok_or_else(|| PortError::Rejected(format!("invalid date '{}'", value)))
}

type CancelSenders = HashMap<RunId, oneshot::Sender<()>>;

enum ChildExit {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Runs each triggered job version as a local child process.
///
/// The process is killed after the job's `timeout_secs` or on cancel. Exit
/// states are queued and handed to the scheduler through `poll_updates`. In
/// dry-run mode nothing is started and every run succeeds immediately.
pub(crate) struct LocalProcessExecutor {
    store: JobDefinitionStore,
    dry_run: bool,
    cancels: Arc<Mutex<CancelSenders>>,
    updates: Arc<Mutex<Vec<RunUpdate>>>,
}

impl LocalProcessExecutor {
    pub(crate) fn new(store: JobDefinitionStore, dry_run: bool) -> Self {
        Self {
            store,
            dry_run,
            cancels: Arc::new(Mutex::new(HashMap::new())),
            updates: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn spawn(
        &self,
        run_id: RunId,
        job_id: JobId,
        environment: Environment,
        execution: &ExecutionSpec,
    ) -> Result<(), PortError> {
        let mut command = Command::new(&execution.command);
        command
            .args(&execution.args)
            .envs(&execution.env)
            .env("CRONWARDEN_JOB_ID", job_id.to_string())
            .env("CRONWARDEN_RUN_ID", run_id.as_str())
            .env("CRONWARDEN_ENVIRONMENT", environment.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &execution.working_dir {
            command.current_dir(dir);
        }
        let mut child = command.spawn().map_err(|e| {
            PortError::Rejected(format!("cannot start '{}': {}", execution.command, e))
        })?;

        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.cancels.lock().insert(run_id.clone(), cancel_tx);
        let cancels = self.cancels.clone();
        let updates = self.updates.clone();
        let timeout = Duration::from_secs(execution.timeout_secs);

        tokio::spawn(async move {
            let exit = tokio::select! {
                status = child.wait() => ChildExit::Exited(status),
                _ = tokio::time::sleep(timeout) => ChildExit::TimedOut,
                _ = cancel_rx => ChildExit::Cancelled,
            };

            let state = match exit {
                ChildExit::Exited(Ok(status)) if status.success() => RunState::Succeeded,
                ChildExit::Exited(Ok(status)) => {
                    warn!("Run {} exited with {}", run_id, status);
                    RunState::Failed
                }
                ChildExit::Exited(Err(e)) => {
                    warn!("Lost track of run {}: {}", run_id, e);
                    RunState::Failed
                }
                ChildExit::TimedOut => {
                    warn!("Run {} timed out after {:?}", run_id, timeout);
                    kill(&mut child, &run_id).await;
                    RunState::Failed
                }
                ChildExit::Cancelled => {
                    kill(&mut child, &run_id).await;
                    RunState::Cancelled
                }
            };

            cancels.lock().remove(&run_id);
            info!("Run {} finished: {:?}", run_id, state);
            updates.lock().push(RunUpdate::new(run_id, state));
        });
        Ok(())
    }
}

async fn kill(child: &mut Child, run_id: &RunId) {
    if let Err(e) = child.kill().await {
        warn!("Failed to kill run {}: {}", run_id, e);
    }
}

#[async_trait]
impl ExecutionTriggerPort for LocalProcessExecutor {
    async fn trigger(
        &self,
        job_id: JobId,
        version: u32,
        environment: Environment,
    ) -> Result<RunId, PortError> {
        let record = self
            .store
            .version(&job_id, version)
            .await
            .map_err(|e| PortError::Rejected(e.to_string()))?;
        let execution = &record.spec.execution;
        let run_id = RunId::new(format!("run-{}", Uuid::new_v4().simple()));

        if self.dry_run {
            info!(
                "Dry run {} of job {} v{} in {}: {} {}",
                run_id,
                job_id,
                version,
                environment,
                execution.command,
                execution.args.join(" ")
            );
            self.updates
                .lock()
                .push(RunUpdate::new(run_id.clone(), RunState::Succeeded));
            return Ok(run_id);
        }

        self.spawn(run_id.clone(), job_id, environment, execution)?;
        info!(
            "Started run {} of job {} v{} in {}: {}",
            run_id, job_id, version, environment, execution.command
        );
        Ok(run_id)
    }

    async fn cancel(&self, run_id: &RunId) -> Result<(), PortError> {
        let Some(cancel) = self.cancels.lock().remove(run_id) else {
            return Err(PortError::Rejected(format!("run {} is not running", run_id)));
        };
        // A closed channel means the run exited on its own meanwhile.
        let _ = cancel.send(());
        info!("Cancel of run {} requested", run_id);
        Ok(())
    }

    async fn poll_updates(&self) -> Result<Vec<RunUpdate>, PortError> {
        Ok(std::mem::take(&mut *self.updates.lock()))
    }
}

/// Notifier that writes events to the `cronwarden::notify` target.
#[derive(Debug, Default)]
pub(crate) struct TracingNotifier;

#[async_trait]
impl NotificationPort for TracingNotifier {
    async fn notify(&self, event: &JobEvent) -> Result<(), PortError> {
        info!(
            target: "cronwarden::notify",
            job_id = %event.job_id,
            actor = %event.actor,
            "{}",
            event.kind.action()
        );
        Ok(())
    }
}

/// Audit log that writes entries to the `cronwarden::audit` target.
#[derive(Debug, Default)]
pub(crate) struct TracingAuditLog;

#[async_trait]
impl AuditLogPort for TracingAuditLog {
    async fn record(&self, entry: &AuditEntry) -> Result<(), PortError> {
        info!(
            target: "cronwarden::audit",
            actor = %entry.actor,
            job_id = %entry.job_id,
            details = %entry.details,
            "{}",
            entry.action
        );
        Ok(())
    }
}
