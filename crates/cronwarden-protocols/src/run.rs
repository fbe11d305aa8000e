//! Run instances reported by the execution system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{JobId, RunId};
use crate::job::Environment;

/// State of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunState {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunState::Running)
    }
}

/// A run state change reported by the execution system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunUpdate {
    pub run_id: RunId,
    pub state: RunState,
}

impl RunUpdate {
    pub fn new(run_id: RunId, state: RunState) -> Self {
        Self { run_id, state }
    }
}

/// A triggered run of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInstance {
    pub run_id: RunId,
    pub job_id: JobId,
    pub version: u32,
    pub environment: Environment,
    pub fire_time: DateTime<Utc>,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunInstance {
    pub fn started(
        run_id: RunId,
        job_id: JobId,
        version: u32,
        environment: Environment,
        fire_time: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            job_id,
            version,
            environment,
            fire_time,
            state: RunState::Running,
            started_at: now,
            updated_at: now,
        }
    }
}
