//! Execution slot arbitration.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use cronwarden_protocols::{Decision, JobId, RunId};

/// Reason given to candidates that did not get a slot.
pub const SLOTS_EXHAUSTED: &str = "execution slots exhausted";

/// A job whose fire was allowed and now needs an execution slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub job_id: JobId,
    pub queue_priority: u8,
    pub fire_time: DateTime<Utc>,
    /// Running instances to cancel before triggering.
    pub replace: Vec<RunId>,
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    /// Higher priority first, then lower job id.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .queue_priority
            .cmp(&self.queue_priority)
            .then_with(|| self.job_id.cmp(&other.job_id))
            .then_with(|| self.fire_time.cmp(&other.fire_time))
    }
}

/// Result of [`arbitrate`].
#[derive(Debug, Default)]
pub struct Arbitration {
    /// Candidates that won a slot, in admission order.
    pub admitted: Vec<Candidate>,
    /// Losers with their `Defer` decision.
    pub deferred: Vec<(Candidate, Decision)>,
}

/// Admit at most `slots` candidates; the rest are deferred to `retry_after`.
pub fn arbitrate(
    mut candidates: Vec<Candidate>,
    slots: usize,
    retry_after: DateTime<Utc>,
) -> Arbitration {
    candidates.sort();
    let deferred = candidates
        .split_off(slots.min(candidates.len()))
        .into_iter()
        .map(|c| (c, Decision::defer(retry_after, SLOTS_EXHAUSTED)))
        .collect();
    Arbitration {
        admitted: candidates,
        deferred,
    }
}
