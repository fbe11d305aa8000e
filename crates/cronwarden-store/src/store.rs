//! Job Definition Store.

use std::sync::Arc;

use chrono::Utc;
use cronwarden_protocols::{
    ApprovalRef, Environment, JobDefinition, JobEventKind, JobId, JobSpec, LifecycleStatus,
    Observers, VersionRecord,
};
use tracing::{debug, info};

use crate::diff::{diff_specs, FieldChange};
use crate::error::StoreError;
use crate::repository::{JobRepository, MemoryJobRepository, VersionCommit};
use crate::validation::validate_spec;

/// Attempts for head updates (status, approval) that lose a race.
const HEAD_UPDATE_ATTEMPTS: usize = 3;

/// Filter for [`JobDefinitionStore::list`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub status: Option<LifecycleStatus>,
    pub environment: Option<Environment>,
    pub tag: Option<String>,
}

impl JobFilter {
    /// Create a filter that matches everything.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: LifecycleStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn matches(&self, definition: &JobDefinition) -> bool {
        self.status.is_none_or(|s| s == definition.status)
            && self
                .environment
                .is_none_or(|e| e == definition.spec.environment)
            && self
                .tag
                .as_ref()
                .is_none_or(|t| definition.spec.tags.contains(t))
    }
}

/// Sole writer of job definitions and version records.
///
/// `save` and `rollback` are optimistic: they never wait on each other, and
/// the loser of a race gets [`StoreError::ConcurrentModification`].
#[derive(Clone)]
pub struct JobDefinitionStore {
    repository: Arc<dyn JobRepository>,
    observers: Observers,
}

impl JobDefinitionStore {
    /// Create a new store over a repository.
    pub fn new(repository: Arc<dyn JobRepository>) -> Self {
        Self {
            repository,
            observers: Observers::noop(),
        }
    }

    /// Create a store backed by memory.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryJobRepository::new()))
    }

    /// Report transitions to these observers.
    pub fn with_observers(mut self, observers: Observers) -> Self {
        self.observers = observers;
        self
    }

    /// Validate a draft and store it as version 1.
    pub async fn create(&self, draft: JobSpec, author: &str) -> Result<JobDefinition, StoreError> {
        validate_spec(&draft)?;
        let definition = JobDefinition::new_draft(draft, "Initial version", author);
        self.repository.insert(&definition).await?;

        info!("Created job '{}' ({})", definition.spec.name, definition.id);
        self.observers.emit(author, definition.id, JobEventKind::Created { version: 1 });
        Ok(definition)
    }

    /// Get the current head of a job.
    pub async fn get(&self, id: &JobId) -> Result<JobDefinition, StoreError> {
        self.repository
            .load(id)
            .await?
            .ok_or(StoreError::NotFound(*id))
    }

    /// List jobs matching a filter, ordered by id.
    pub async fn list(&self, filter: &JobFilter) -> Result<Vec<JobDefinition>, StoreError> {
        let mut jobs: Vec<_> = self
            .repository
            .load_all()
            .await?
            .into_iter()
            .filter(|d| filter.matches(d))
            .collect();
        jobs.sort_by_key(|d| d.id);
        Ok(jobs)
    }

    /// Apply a mutation on top of `base_version` and commit it as a new
    /// version. Returns the new version number.
    ///
    /// The new head is a `Draft`: edited content has to be deployed again
    /// before it is scheduled.
    pub async fn save<F>(
        &self,
        id: &JobId,
        base_version: u32,
        mutation: F,
        commit_message: &str,
        author: &str,
    ) -> Result<u32, StoreError>
    where
        F: FnOnce(&mut JobSpec) + Send,
    {
        let current = self.writable(id).await?;
        if current.current_version != base_version {
            return Err(StoreError::ConcurrentModification {
                job_id: *id,
                expected: base_version,
                actual: current.current_version,
            });
        }

        let mut spec = current.spec.clone();
        mutation(&mut spec);
        validate_spec(&spec)?;

        let version = self
            .commit_head(&current, spec, commit_message.to_string(), author)
            .await?;

        info!("Saved job {} as version {}", id, version);
        self.observers.emit(author, *id, JobEventKind::Saved { version });
        self.emit_reset(&current, author);
        Ok(version)
    }

    /// Full history of superseded versions, oldest first.
    pub async fn history(&self, id: &JobId) -> Result<Vec<VersionRecord>, StoreError> {
        self.get(id).await?;
        self.repository.versions(id).await
    }

    /// Any version of a job, including the head.
    pub async fn version(&self, id: &JobId, version: u32) -> Result<VersionRecord, StoreError> {
        let head = self.get(id).await?;
        if version == head.current_version {
            return Ok(head.head_record());
        }
        self.repository
            .versions(id)
            .await?
            .into_iter()
            .find(|r| r.version == version)
            .ok_or(StoreError::VersionNotFound {
                job_id: *id,
                version,
            })
    }

    /// Copy a historical version into a new head version in `Draft`.
    pub async fn rollback(
        &self,
        id: &JobId,
        target_version: u32,
        author: &str,
    ) -> Result<u32, StoreError> {
        let current = self.writable(id).await?;
        let target = self
            .repository
            .versions(id)
            .await?
            .into_iter()
            .find(|r| r.version == target_version)
            .ok_or(StoreError::VersionNotFound {
                job_id: *id,
                version: target_version,
            })?;

        let message = format!("Rollback to version {}", target_version);
        let version = self
            .commit_head(&current, target.spec, message, author)
            .await?;

        info!(
            "Rolled back job {} to version {} as version {}",
            id, target_version, version
        );
        self.observers.emit(
            author,
            *id,
            JobEventKind::RolledBack {
                target_version,
                new_version: version,
            },
        );
        self.emit_reset(&current, author);
        Ok(version)
    }

    /// Field changes between two versions of a job.
    pub async fn diff(&self, id: &JobId, from: u32, to: u32) -> Result<Vec<FieldChange>, StoreError> {
        let before = self.version(id, from).await?;
        let after = self.version(id, to).await?;
        diff_specs(&before.spec, &after.spec)
    }

    /// Move a job to another lifecycle status. Does not create a version.
    pub async fn transition(
        &self,
        id: &JobId,
        to: LifecycleStatus,
        actor: &str,
    ) -> Result<JobDefinition, StoreError> {
        let (before, after) = self
            .update_head(id, |current| {
                if current.status == to {
                    return Ok(None);
                }
                if !current.status.can_transition_to(to) {
                    return Err(StoreError::InvalidTransition {
                        job_id: current.id,
                        from: current.status,
                        to,
                    });
                }
                let mut next = current.clone();
                next.status = to;
                Ok(Some(next))
            })
            .await?;

        if before.status != after.status {
            info!("Job {} moved from {} to {}", id, before.status, after.status);
            self.observers.emit(
                actor,
                *id,
                JobEventKind::StatusChanged {
                    from: before.status,
                    to: after.status,
                },
            );
        }
        Ok(after)
    }

    /// Disarm a scheduled job.
    pub async fn pause(&self, id: &JobId, actor: &str) -> Result<JobDefinition, StoreError> {
        self.transition(id, LifecycleStatus::Paused, actor).await
    }

    /// Re-arm a paused job.
    pub async fn resume(&self, id: &JobId, actor: &str) -> Result<JobDefinition, StoreError> {
        self.transition(id, LifecycleStatus::Scheduled, actor).await
    }

    /// Retire a job for good.
    pub async fn archive(&self, id: &JobId, actor: &str) -> Result<JobDefinition, StoreError> {
        self.transition(id, LifecycleStatus::Archived, actor).await
    }

    /// Attach (or clear) the approval reference of the head.
    pub async fn record_approval(
        &self,
        id: &JobId,
        approval: Option<ApprovalRef>,
        actor: &str,
    ) -> Result<JobDefinition, StoreError> {
        let (_, after) = self
            .update_head(id, |current| {
                if current.status.is_terminal() {
                    return Err(StoreError::Archived(current.id));
                }
                if current.approval == approval {
                    return Ok(None);
                }
                let mut next = current.clone();
                next.approval = approval.clone();
                Ok(Some(next))
            })
            .await?;

        if let Some(a) = &approval {
            self.observers.emit(
                actor,
                *id,
                JobEventKind::ApprovalRequested {
                    request_id: a.request_id.clone(),
                    version: a.version,
                },
            );
        }
        Ok(after)
    }

    async fn writable(&self, id: &JobId) -> Result<JobDefinition, StoreError> {
        let current = self.get(id).await?;
        if current.status.is_terminal() {
            return Err(StoreError::Archived(*id));
        }
        Ok(current)
    }

    /// Commit `spec` as the version after `current`, reset to `Draft`.
    async fn commit_head(
        &self,
        current: &JobDefinition,
        spec: JobSpec,
        commit_message: String,
        author: &str,
    ) -> Result<u32, StoreError> {
        let definition = JobDefinition {
            current_version: current.current_version + 1,
            spec,
            status: LifecycleStatus::Draft,
            commit_message,
            author: author.to_string(),
            updated_at: Utc::now(),
            approval: None,
            ..current.clone()
        };
        let version = definition.current_version;
        let commit = VersionCommit {
            expected_version: current.current_version,
            expected_status: current.status,
            superseded: current.head_record(),
            definition,
        };
        self.repository.commit(&commit).await?;
        Ok(version)
    }

    fn emit_reset(&self, previous: &JobDefinition, actor: &str) {
        if previous.status != LifecycleStatus::Draft {
            self.observers.emit(
                actor,
                previous.id,
                JobEventKind::StatusChanged {
                    from: previous.status,
                    to: LifecycleStatus::Draft,
                },
            );
        }
    }

    /// Compare-and-swap a non-versioned change of the head, retrying when a
    /// concurrent writer got there first. Returns the head before and after.
    async fn update_head<F>(
        &self,
        id: &JobId,
        change: F,
    ) -> Result<(JobDefinition, JobDefinition), StoreError>
    where
        F: Fn(&JobDefinition) -> Result<Option<JobDefinition>, StoreError> + Send + Sync,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let current = self.get(id).await?;
            let Some(next) = change(&current)? else {
                return Ok((current.clone(), current));
            };

            match self
                .repository
                .update_head(current.current_version, current.status, &next)
                .await
            {
                Ok(()) => return Ok((current, next)),
                Err(e) if e.is_conflict() && attempt < HEAD_UPDATE_ATTEMPTS => {
                    debug!("Head of job {} moved, retrying ({})", id, attempt);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
