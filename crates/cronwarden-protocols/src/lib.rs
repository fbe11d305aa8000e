//! # Cronwarden Protocols
//!
//! Core data model and collaborator port definitions for cronwarden.
//! Contains only types and interface definitions, no storage or scheduling.
//!
//! ## Core Types
//!
//! - [`JobDefinition`] - the versioned aggregate root
//! - [`VersionRecord`] - immutable snapshot of a superseded version
//! - [`DeploymentRecord`] - a promotion of a version into an environment
//! - [`Decision`] - gating outcome for a proposed fire time
//!
//! ## Ports
//!
//! - [`ApprovalWorkflowPort`] - manual approval requests
//! - [`DataDependencyOraclePort`] - data readiness checks
//! - [`ExecutionTriggerPort`] - starts (and cancels) job runs
//! - [`NotificationPort`] / [`AuditLogPort`] - fire-and-forget observers
//! - [`HolidayCalendarPort`] - excluded dates for schedules

pub mod decision;
pub mod deployment;
pub mod error;
pub mod ids;
pub mod job;
pub mod ports;
pub mod run;

pub use decision::Decision;
pub use deployment::{DeploymentRecord, DeploymentStatus};
pub use error::PortError;
pub use ids::{ApprovalRequestId, DeploymentId, JobId, RunId};
pub use job::{
    ApprovalRef, ConcurrencyPolicy, DataDependency, DependencyCondition, Environment,
    ExecutionSpec, GatingSpec, JobDefinition, JobSpec, LifecycleStatus, ResourceLimits,
    RetryPolicy, RetryStrategy, ScheduleSpec, VersionRecord,
};
pub use ports::{
    bounded, ApprovalStatus, ApprovalWorkflowPort, AuditEntry, AuditLogPort, DataDependencyOraclePort,
    ExecutionTriggerPort, HolidayCalendarPort, JobEvent, JobEventKind, NoopAuditLog,
    NoopNotifier, NotificationPort, Observers, DEFAULT_PORT_TIMEOUT,
};
pub use run::{RunInstance, RunState, RunUpdate};
