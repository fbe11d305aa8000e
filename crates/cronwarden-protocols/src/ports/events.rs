//! Notification and audit ports, plus the fan-out used after state transitions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::deployment::DeploymentStatus;
use crate::error::PortError;
use crate::ids::{ApprovalRequestId, DeploymentId, JobId, RunId};
use crate::job::{Environment, LifecycleStatus};
use crate::ports::{bounded, DEFAULT_PORT_TIMEOUT};
use crate::run::RunState;

/// What happened to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEventKind {
    Created {
        version: u32,
    },
    Saved {
        version: u32,
    },
    RolledBack {
        target_version: u32,
        new_version: u32,
    },
    StatusChanged {
        from: LifecycleStatus,
        to: LifecycleStatus,
    },
    ApprovalRequested {
        request_id: ApprovalRequestId,
        version: u32,
    },
    DeploymentChanged {
        deployment_id: DeploymentId,
        environment: Environment,
        status: DeploymentStatus,
    },
    RunTriggered {
        run_id: RunId,
        fire_time: DateTime<Utc>,
    },
    RunReported {
        run_id: RunId,
        state: RunState,
    },
    RunsCancelled {
        runs: Vec<RunId>,
    },
}

impl JobEventKind {
    /// Stable action name used for audit entries.
    pub fn action(&self) -> &'static str {
        match self {
            JobEventKind::Created { .. } => "job.created",
            JobEventKind::Saved { .. } => "job.saved",
            JobEventKind::RolledBack { .. } => "job.rolled_back",
            JobEventKind::StatusChanged { .. } => "job.status_changed",
            JobEventKind::ApprovalRequested { .. } => "approval.requested",
            JobEventKind::DeploymentChanged { .. } => "deployment.changed",
            JobEventKind::RunTriggered { .. } => "run.triggered",
            JobEventKind::RunReported { .. } => "run.reported",
            JobEventKind::RunsCancelled { .. } => "run.cancelled",
        }
    }
}

/// A state transition, as delivered to notification sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub actor: String,
    pub kind: JobEventKind,
    pub at: DateTime<Utc>,
}

/// One audit log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor: String,
    pub action: String,
    pub job_id: JobId,
    pub details: serde_json::Value,
    pub at: DateTime<Utc>,
}

/// Notification delivery (email, chat, paging...).
#[async_trait]
pub trait NotificationPort: Send + Sync {
    async fn notify(&self, event: &JobEvent) -> Result<(), PortError>;
}

/// Audit log sink.
#[async_trait]
pub trait AuditLogPort: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> Result<(), PortError>;
}

/// Notifier that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl NotificationPort for NoopNotifier {
    async fn notify(&self, _event: &JobEvent) -> Result<(), PortError> {
        Ok(())
    }
}

/// Audit log that drops every entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditLog;

#[async_trait]
impl AuditLogPort for NoopAuditLog {
    async fn record(&self, _entry: &AuditEntry) -> Result<(), PortError> {
        Ok(())
    }
}

/// Fire-and-forget fan-out to the notification and audit ports.
///
/// Delivery runs on a spawned task, each call bounded by a timeout.
/// Failures are logged and never undo the transition that produced the
/// event.
#[derive(Clone)]
pub struct Observers {
    notifier: Arc<dyn NotificationPort>,
    audit: Arc<dyn AuditLogPort>,
    timeout: Duration,
}

impl Observers {
    pub fn new(notifier: Arc<dyn NotificationPort>, audit: Arc<dyn AuditLogPort>) -> Self {
        Self {
            notifier,
            audit,
            timeout: DEFAULT_PORT_TIMEOUT,
        }
    }

    /// Observers that discard everything.
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopNotifier), Arc::new(NoopAuditLog))
    }

    /// Bound each delivery call by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Publish one transition. Must be called inside a tokio runtime.
    pub fn emit(&self, actor: &str, job_id: JobId, kind: JobEventKind) {
        let at = Utc::now();
        let entry = AuditEntry {
            actor: actor.to_string(),
            action: kind.action().to_string(),
            job_id,
            details: serde_json::to_value(&kind).unwrap_or(serde_json::Value::Null),
            at,
        };
        let event = JobEvent {
            job_id,
            actor: actor.to_string(),
            kind,
            at,
        };

        let notifier = self.notifier.clone();
        let audit = self.audit.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            if let Err(e) = bounded(timeout, "audit log", audit.record(&entry)).await {
                warn!("Audit log failed for job {} ({}): {}", job_id, entry.action, e);
            }
            if let Err(e) = bounded(timeout, "notification", notifier.notify(&event)).await {
                warn!("Notification failed for job {} ({}): {}", job_id, entry.action, e);
            }
        });
    }
}

impl Default for Observers {
    fn default() -> Self {
        Self::noop()
    }
}
