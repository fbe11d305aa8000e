//! Job definition, version records and lifecycle.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ApprovalRequestId, JobId};

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleStatus {
    /// Editable, not armed anywhere.
    Draft,
    /// Manual approval granted, not yet armed.
    Approved,
    /// Armed; fire times flow through gating.
    Scheduled,
    /// Reported running by the execution system.
    Running,
    /// Temporarily disarmed.
    Paused,
    /// Reported failed by the execution system.
    Failed,
    /// Reported completed by the execution system.
    Completed,
    /// Terminal. No further scheduling or editing.
    Archived,
}

impl Default for LifecycleStatus {
    fn default() -> Self {
        LifecycleStatus::Draft
    }
}

impl LifecycleStatus {
    /// Whether a transition from `self` to `to` is allowed.
    pub fn can_transition_to(self, to: LifecycleStatus) -> bool {
        use LifecycleStatus::*;

        if self == Archived {
            return false;
        }
        if to == Archived {
            return true;
        }
        matches!(
            (self, to),
            (Draft, Approved)
                | (Draft, Scheduled)
                | (Approved, Scheduled)
                | (Approved, Draft)
                | (Scheduled, Paused)
                | (Scheduled, Running)
                | (Scheduled, Completed)
                | (Scheduled, Failed)
                | (Scheduled, Draft)
                | (Paused, Scheduled)
                | (Paused, Draft)
                | (Running, Scheduled)
                | (Running, Completed)
                | (Running, Failed)
                | (Completed, Scheduled)
                | (Completed, Draft)
                | (Failed, Scheduled)
                | (Failed, Draft)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == LifecycleStatus::Archived
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl FromStr for LifecycleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "draft" => Ok(LifecycleStatus::Draft),
            "approved" => Ok(LifecycleStatus::Approved),
            "scheduled" => Ok(LifecycleStatus::Scheduled),
            "running" => Ok(LifecycleStatus::Running),
            "paused" => Ok(LifecycleStatus::Paused),
            "failed" => Ok(LifecycleStatus::Failed),
            "completed" => Ok(LifecycleStatus::Completed),
            "archived" => Ok(LifecycleStatus::Archived),
            other => Err(format!("unknown lifecycle status '{}'", other)),
        }
    }
}

/// Target environment of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
    Sandbox,
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Development
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" | "stage" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            "sandbox" => Ok(Environment::Sandbox),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

/// Rule for overlapping executions of the same job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConcurrencyPolicy {
    /// Overlapping runs are fine.
    Allow,
    /// Skip a fire while a run is active.
    Forbid,
    /// Cancel active runs, then start the new one.
    Replace,
}

impl Default for ConcurrencyPolicy {
    fn default() -> Self {
        ConcurrencyPolicy::Forbid
    }
}

/// Retry delay strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RetryStrategy {
    Fixed,
    ExponentialBackoff,
}

/// Retry policy recorded for the execution system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub delay_seconds: u64,
    #[serde(default = "default_retry_strategy")]
    pub strategy: RetryStrategy,
}

fn default_retry_delay() -> u64 {
    60
}

fn default_retry_strategy() -> RetryStrategy {
    RetryStrategy::Fixed
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            delay_seconds: default_retry_delay(),
            strategy: default_retry_strategy(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), or `None` once exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_retries {
            return None;
        }
        let secs = match self.strategy {
            RetryStrategy::Fixed => self.delay_seconds,
            RetryStrategy::ExponentialBackoff => self
                .delay_seconds
                .saturating_mul(2u64.saturating_pow(attempt - 1)),
        };
        Some(Duration::from_secs(secs))
    }
}

/// Resource limits passed through to the execution system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default)]
    pub cpu_millis: Option<u32>,
    #[serde(default)]
    pub memory_mb: Option<u64>,
}

/// What a job runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub resources: ResourceLimits,
    #[serde(default)]
    pub concurrency_policy: ConcurrencyPolicy,
}

fn default_timeout() -> u64 {
    3600
}

impl ExecutionSpec {
    /// Create an execution spec for a command with default policies.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
            timeout_secs: default_timeout(),
            retry: RetryPolicy::default(),
            resources: ResourceLimits::default(),
            concurrency_policy: ConcurrencyPolicy::default(),
        }
    }

    /// Add arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the concurrency policy.
    pub fn with_concurrency_policy(mut self, policy: ConcurrencyPolicy) -> Self {
        self.concurrency_policy = policy;
        self
    }
}

/// A data readiness predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DependencyCondition {
    FileExists,
    RowCountGreaterThanZero,
    LastModifiedAfterDate,
}

/// A data dependency that must hold before a fire is allowed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataDependency {
    pub source: String,
    pub condition: DependencyCondition,
    #[serde(default)]
    pub value: Option<String>,
}

impl DataDependency {
    pub fn new(source: impl Into<String>, condition: DependencyCondition) -> Self {
        Self {
            source: source.into(),
            condition,
            value: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

impl fmt::Display for DataDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.condition, self.source)?;
        if let Some(value) = &self.value {
            write!(f, " > {}", value)?;
        }
        Ok(())
    }
}

/// Gating configuration of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatingSpec {
    #[serde(default)]
    pub manual_approval_required: bool,
    #[serde(default)]
    pub approvers: Vec<String>,
    #[serde(default)]
    pub data_dependencies: Vec<DataDependency>,
    /// 1..=100, higher runs first when slots are contended.
    #[serde(default = "default_queue_priority")]
    pub queue_priority: u8,
}

fn default_queue_priority() -> u8 {
    50
}

impl Default for GatingSpec {
    fn default() -> Self {
        Self {
            manual_approval_required: false,
            approvers: Vec::new(),
            data_dependencies: Vec::new(),
            queue_priority: default_queue_priority(),
        }
    }
}

/// Unparsed schedule as written by the job author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub expression: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub holiday_calendar: Option<String>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl ScheduleSpec {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            timezone: default_timezone(),
            holiday_calendar: None,
        }
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    pub fn with_holiday_calendar(mut self, calendar: impl Into<String>) -> Self {
        self.holiday_calendar = Some(calendar.into());
        self
    }
}

/// The versioned content of a job. A version snapshot is exactly one `JobSpec`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub schedule: ScheduleSpec,
    pub execution: ExecutionSpec,
    #[serde(default)]
    pub gating: GatingSpec,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl JobSpec {
    /// Create a draft spec with default gating.
    pub fn new(name: impl Into<String>, schedule: ScheduleSpec, execution: ExecutionSpec) -> Self {
        Self {
            name: name.into(),
            description: None,
            schedule,
            execution,
            gating: GatingSpec::default(),
            environment: Environment::default(),
            tags: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_gating(mut self, gating: GatingSpec) -> Self {
        self.gating = gating;
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }
}

/// Pending manual approval attached to a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRef {
    pub request_id: ApprovalRequestId,
    /// Version the approval was requested for.
    pub version: u32,
    pub environment: Environment,
    pub requested_at: DateTime<Utc>,
}

/// The versioned aggregate root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub id: JobId,
    pub current_version: u32,
    pub spec: JobSpec,
    pub status: LifecycleStatus,
    /// Commit message of the current version.
    pub commit_message: String,
    /// Author of the current version.
    pub author: String,
    pub created_at: DateTime<Utc>,
    /// When the current version was written.
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub approval: Option<ApprovalRef>,
}

impl JobDefinition {
    /// A fresh version-1 draft.
    pub fn new_draft(spec: JobSpec, commit_message: impl Into<String>, author: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            current_version: 1,
            spec,
            status: LifecycleStatus::Draft,
            commit_message: commit_message.into(),
            author: author.into(),
            created_at: now,
            updated_at: now,
            approval: None,
        }
    }

    /// The current head expressed as a version record.
    pub fn head_record(&self) -> VersionRecord {
        VersionRecord {
            job_id: self.id,
            version: self.current_version,
            spec: self.spec.clone(),
            commit_message: self.commit_message.clone(),
            author: self.author.clone(),
            timestamp: self.updated_at,
        }
    }

    /// Whether the head has a pending or granted approval for `version`.
    pub fn approval_for(&self, version: u32) -> Option<&ApprovalRef> {
        self.approval.as_ref().filter(|a| a.version == version)
    }
}

/// Immutable snapshot of one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub job_id: JobId,
    pub version: u32,
    pub spec: JobSpec,
    pub commit_message: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
