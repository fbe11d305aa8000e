//! Configuration schema definitions.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use cronwarden_schedule::{HolidaySet, DEFAULT_HORIZON_DAYS};
use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub gating: GatingConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub approvals: ApprovalsConfig,

    /// Named holiday calendars referenced by job schedules.
    #[serde(default)]
    pub calendars: BTreeMap<String, CalendarConfig>,
}

fn home_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cronwarden")
}

fn default_true() -> bool {
    true
}

/// Job and deployment storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "file" or "memory".
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Root directory of the file backend.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_backend() -> String {
    "file".to_string()
}

fn default_store_path() -> PathBuf {
    home_dir().join("store")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_store_path(),
        }
    }
}

/// Scheduler tick configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Execution slots shared by all jobs in one tick.
    #[serde(default = "default_max_concurrent_triggers")]
    pub max_concurrent_triggers: usize,

    /// How far ahead fire time searches may look.
    #[serde(default = "default_search_horizon")]
    pub search_horizon_days: u32,
}

fn default_tick_interval() -> u64 {
    15
}

fn default_max_concurrent_triggers() -> usize {
    4
}

fn default_search_horizon() -> u32 {
    DEFAULT_HORIZON_DAYS
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            max_concurrent_triggers: default_max_concurrent_triggers(),
            search_horizon_days: default_search_horizon(),
        }
    }
}

/// Defer cadence of the gating evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatingConfig {
    /// Delay before polling a pending approval again.
    #[serde(default = "default_approval_poll")]
    pub approval_poll_secs: u64,

    /// Delay before re-checking unmet dependencies or unavailable collaborators.
    #[serde(default = "default_dependency_retry")]
    pub dependency_retry_secs: u64,

    /// Longest wait for one collaborator call before it counts as unavailable.
    #[serde(default = "default_port_timeout")]
    pub port_timeout_secs: u64,
}

fn default_approval_poll() -> u64 {
    300
}

fn default_dependency_retry() -> u64 {
    60
}

fn default_port_timeout() -> u64 {
    10
}

impl GatingConfig {
    pub fn port_timeout(&self) -> Duration {
        Duration::from_secs(self.port_timeout_secs)
    }
}

impl Default for GatingConfig {
    fn default() -> Self {
        Self {
            approval_poll_secs: default_approval_poll(),
            dependency_retry_secs: default_dependency_retry(),
            port_timeout_secs: default_port_timeout(),
        }
    }
}

/// Local execution of triggered runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Log runs and report them succeeded without starting a process.
    #[serde(default)]
    pub dry_run: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,

    /// Directory for daily rolling log files.
    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,

    #[serde(default = "default_true")]
    pub file_enabled: bool,

    /// Emit file logs as JSON lines.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_log_directory() -> PathBuf {
    home_dir().join("logs")
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            directory: default_log_directory(),
            file_enabled: default_true(),
            json: false,
        }
    }
}

/// File based approval inbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalsConfig {
    #[serde(default = "default_approvals_path")]
    pub path: PathBuf,
}

fn default_approvals_path() -> PathBuf {
    home_dir().join("approvals")
}

impl Default for ApprovalsConfig {
    fn default() -> Self {
        Self {
            path: default_approvals_path(),
        }
    }
}

/// One holiday calendar.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalendarConfig {
    #[serde(default)]
    pub description: Option<String>,

    /// Excluded local dates, `YYYY-MM-DD`.
    #[serde(default)]
    pub dates: HolidaySet,
}
