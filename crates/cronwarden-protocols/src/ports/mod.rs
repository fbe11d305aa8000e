//! Collaborator ports consumed by the core.
//!
//! Implementations are opaque and replaceable. Every method may fail with a
//! [`PortError`](crate::PortError); callers treat
//! [`PortError::Unavailable`](crate::PortError::Unavailable) as transient.
//! Callers bound every call with [`bounded`] so a hung collaborator reads
//! as unavailable.

use std::future::Future;
use std::time::Duration;

use crate::error::PortError;

pub mod approval;
pub mod calendar;
pub mod data;
pub mod events;
pub mod execution;

pub use approval::{ApprovalStatus, ApprovalWorkflowPort};
pub use calendar::HolidayCalendarPort;
pub use data::DataDependencyOraclePort;
pub use events::{
    AuditEntry, AuditLogPort, JobEvent, JobEventKind, NoopAuditLog, NoopNotifier,
    NotificationPort, Observers,
};
pub use execution::ExecutionTriggerPort;

/// Timeout applied to collaborator calls unless configured otherwise.
pub const DEFAULT_PORT_TIMEOUT: Duration = Duration::from_secs(10);

/// Await a port call for at most `timeout`.
///
/// Elapsed calls fail with [`PortError::Unavailable`].
pub async fn bounded<T, F>(timeout: Duration, what: &str, call: F) -> Result<T, PortError>
where
    F: Future<Output = Result<T, PortError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(PortError::Unavailable(format!(
            "{} timed out after {:?}",
            what, timeout
        ))),
    }
}
