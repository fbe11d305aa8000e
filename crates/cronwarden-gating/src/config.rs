//! Gating configuration.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use cronwarden_protocols::DEFAULT_PORT_TIMEOUT;

/// Defer cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatingConfig {
    /// Delay before polling a pending approval again.
    pub approval_poll: Duration,
    /// Delay before re-checking dependencies or an unavailable collaborator.
    pub dependency_retry: Duration,
    /// Longest wait for one approval or oracle call.
    pub port_timeout: Duration,
}

impl Default for GatingConfig {
    fn default() -> Self {
        Self {
            approval_poll: Duration::from_secs(300),
            dependency_retry: Duration::from_secs(60),
            port_timeout: DEFAULT_PORT_TIMEOUT,
        }
    }
}

impl GatingConfig {
    /// Create a config from intervals in seconds.
    pub fn from_secs(approval_poll_secs: u64, dependency_retry_secs: u64) -> Self {
        Self {
            approval_poll: Duration::from_secs(approval_poll_secs),
            dependency_retry: Duration::from_secs(dependency_retry_secs),
            port_timeout: DEFAULT_PORT_TIMEOUT,
        }
    }

    pub fn with_port_timeout(mut self, timeout: Duration) -> Self {
        self.port_timeout = timeout;
        self
    }

    pub(crate) fn approval_retry_after(&self, base: DateTime<Utc>) -> DateTime<Utc> {
        offset(base, self.approval_poll)
    }

    pub(crate) fn dependency_retry_after(&self, base: DateTime<Utc>) -> DateTime<Utc> {
        offset(base, self.dependency_retry)
    }
}

fn offset(base: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    let delta = TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX);
    base.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
