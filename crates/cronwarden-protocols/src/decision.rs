//! Gating decisions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::RunId;

/// Outcome of gating a proposed fire time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// Run it. `replace` lists running instances to cancel first.
    Allow { replace: Vec<RunId> },
    /// Do not run this fire.
    Deny { reason: String },
    /// Not yet; evaluate again at `retry_after`.
    Defer {
        retry_after: DateTime<Utc>,
        reason: String,
    },
}

impl Decision {
    pub fn allow() -> Self {
        Decision::Allow { replace: Vec::new() }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Decision::Deny {
            reason: reason.into(),
        }
    }

    pub fn defer(retry_after: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Decision::Defer {
            retry_after,
            reason: reason.into(),
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }

    pub fn is_deny(&self) -> bool {
        matches!(self, Decision::Deny { .. })
    }

    pub fn is_defer(&self) -> bool {
        matches!(self, Decision::Defer { .. })
    }

    /// Reason text for `Deny` and `Defer`.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Decision::Allow { .. } => None,
            Decision::Deny { reason } | Decision::Defer { reason, .. } => Some(reason),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Allow { replace } if replace.is_empty() => f.write_str("allow"),
            Decision::Allow { replace } => write!(f, "allow (replacing {} run(s))", replace.len()),
            Decision::Deny { reason } => write!(f, "deny: {}", reason),
            Decision::Defer {
                retry_after,
                reason,
            } => write!(f, "defer until {}: {}", retry_after.to_rfc3339(), reason),
        }
    }
}
