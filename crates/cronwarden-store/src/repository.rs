//! Persistence port for job definitions and their version history.

use std::collections::HashMap;

use async_trait::async_trait;
use cronwarden_protocols::{JobDefinition, JobId, LifecycleStatus, VersionRecord};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::StoreError;

/// One atomic content change: the superseded head moves into history and the
/// new head replaces the definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionCommit {
    /// Version the caller based the change on.
    pub expected_version: u32,
    /// Status the head had when the caller read it.
    pub expected_status: LifecycleStatus,
    /// The head being superseded, appended to history.
    pub superseded: VersionRecord,
    /// The new head. Its `current_version` is `expected_version + 1`.
    pub definition: JobDefinition,
}

impl VersionCommit {
    pub fn job_id(&self) -> JobId {
        self.definition.id
    }

    /// Check that `current` is still the head this commit was built on.
    /// An archived head is never replaced.
    pub(crate) fn check(&self, current: &JobDefinition) -> Result<(), StoreError> {
        if current.status.is_terminal() {
            return Err(StoreError::Archived(current.id));
        }
        check_head(current, self.expected_version, self.expected_status)
    }
}

/// Storage backend for the store.
///
/// Implementations must make [`commit`](JobRepository::commit) all-or-nothing
/// and must check versions atomically with the write.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a brand-new definition. Fails if the id exists.
    async fn insert(&self, definition: &JobDefinition) -> Result<(), StoreError>;

    /// Load the current head of a job.
    async fn load(&self, id: &JobId) -> Result<Option<JobDefinition>, StoreError>;

    /// Load every job.
    async fn load_all(&self) -> Result<Vec<JobDefinition>, StoreError>;

    /// Append a version and replace the head, if the head is still at
    /// `expected_version` and `expected_status`.
    async fn commit(&self, commit: &VersionCommit) -> Result<(), StoreError>;

    /// Replace non-versioned head fields (status, approval), if the head is
    /// still at the given version and status.
    async fn update_head(
        &self,
        expected_version: u32,
        expected_status: LifecycleStatus,
        definition: &JobDefinition,
    ) -> Result<(), StoreError>;

    /// Superseded versions of a job, oldest first.
    async fn versions(&self, id: &JobId) -> Result<Vec<VersionRecord>, StoreError>;
}

/// Check that a stored head still matches what the caller read.
pub(crate) fn check_head(
    current: &JobDefinition,
    expected_version: u32,
    expected_status: LifecycleStatus,
) -> Result<(), StoreError> {
    if current.current_version != expected_version || current.status != expected_status {
        return Err(StoreError::ConcurrentModification {
            job_id: current.id,
            expected: expected_version,
            actual: current.current_version,
        });
    }
    Ok(())
}

#[derive(Default)]
struct MemoryState {
    definitions: HashMap<JobId, JobDefinition>,
    versions: HashMap<JobId, Vec<VersionRecord>>,
}

/// In-memory repository.
#[derive(Default)]
pub struct MemoryJobRepository {
    state: RwLock<MemoryState>,
}

impl MemoryJobRepository {
    /// Create a new memory repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn insert(&self, definition: &JobDefinition) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.definitions.contains_key(&definition.id) {
            return Err(StoreError::AlreadyExists(definition.id));
        }
        state.definitions.insert(definition.id, definition.clone());
        state.versions.insert(definition.id, Vec::new());
        Ok(())
    }

    async fn load(&self, id: &JobId) -> Result<Option<JobDefinition>, StoreError> {
        Ok(self.state.read().await.definitions.get(id).cloned())
    }

    async fn load_all(&self) -> Result<Vec<JobDefinition>, StoreError> {
        Ok(self.state.read().await.definitions.values().cloned().collect())
    }

    async fn commit(&self, commit: &VersionCommit) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let id = commit.job_id();
        let current = state.definitions.get(&id).ok_or(StoreError::NotFound(id))?;
        commit.check(current)?;

        state
            .versions
            .entry(id)
            .or_default()
            .push(commit.superseded.clone());
        state.definitions.insert(id, commit.definition.clone());
        Ok(())
    }

    async fn update_head(
        &self,
        expected_version: u32,
        expected_status: LifecycleStatus,
        definition: &JobDefinition,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let current = state
            .definitions
            .get(&definition.id)
            .ok_or(StoreError::NotFound(definition.id))?;
        check_head(current, expected_version, expected_status)?;
        state.definitions.insert(definition.id, definition.clone());
        Ok(())
    }

    async fn versions(&self, id: &JobId) -> Result<Vec<VersionRecord>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .versions
            .get(id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cronwarden_protocols::{ExecutionSpec, JobSpec, ScheduleSpec};

    fn draft() -> JobDefinition {
        let spec = JobSpec::new(
            "nightly-report",
            ScheduleSpec::new("0 2 * * *"),
            ExecutionSpec::new("report.sh"),
        );
        JobDefinition::new_draft(spec, "Initial version", "alice")
    }

    fn next_commit(head: &JobDefinition) -> VersionCommit {
        let mut definition = head.clone();
        definition.current_version += 1;
        definition.spec.name = format!("nightly-report-v{}", definition.current_version);
        VersionCommit {
            expected_version: head.current_version,
            expected_status: head.status,
            superseded: head.head_record(),
            definition,
        }
    }

    #[tokio::test]
    async fn test_insert_and_load() {
        let repo = MemoryJobRepository::new();
        let def = draft();
        repo.insert(&def).await.unwrap();

        assert_eq!(repo.load(&def.id).await.unwrap(), Some(def.clone()));
        assert!(repo.versions(&def.id).await.unwrap().is_empty());
        assert!(matches!(
            repo.insert(&def).await,
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_commit_appends_superseded_head() {
        let repo = MemoryJobRepository::new();
        let def = draft();
        repo.insert(&def).await.unwrap();

        let commit = next_commit(&def);
        repo.commit(&commit).await.unwrap();

        let head = repo.load(&def.id).await.unwrap().unwrap();
        assert_eq!(head.current_version, 2);
        let versions = repo.versions(&def.id).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version, 1);
        assert_eq!(versions[0].spec.name, "nightly-report");
    }

    #[tokio::test]
    async fn test_stale_commit_rejected() {
        let repo = MemoryJobRepository::new();
        let def = draft();
        repo.insert(&def).await.unwrap();

        let first = next_commit(&def);
        let stale = next_commit(&def);
        repo.commit(&first).await.unwrap();

        let err = repo.commit(&stale).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::ConcurrentModification {
                expected: 1,
                actual: 2,
                ..
            }
        ));
        assert_eq!(repo.versions(&def.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_head_checks_status() {
        let repo = MemoryJobRepository::new();
        let def = draft();
        repo.insert(&def).await.unwrap();

        let mut scheduled = def.clone();
        scheduled.status = LifecycleStatus::Scheduled;
        repo.update_head(1, LifecycleStatus::Draft, &scheduled)
            .await
            .unwrap();

        let mut paused = def.clone();
        paused.status = LifecycleStatus::Paused;
        let err = repo
            .update_head(1, LifecycleStatus::Draft, &paused)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_commit_rejected_after_status_moved() {
        let repo = MemoryJobRepository::new();
        let def = draft();
        repo.insert(&def).await.unwrap();
        let commit = next_commit(&def);

        let mut archived = def.clone();
        archived.status = LifecycleStatus::Archived;
        repo.update_head(1, LifecycleStatus::Draft, &archived)
            .await
            .unwrap();

        assert!(matches!(
            repo.commit(&commit).await,
            Err(StoreError::Archived(_))
        ));
        let head = repo.load(&def.id).await.unwrap().unwrap();
        assert_eq!(head.status, LifecycleStatus::Archived);
        assert_eq!(head.current_version, 1);
        assert!(repo.versions(&def.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_unknown_job() {
        let repo = MemoryJobRepository::new();
        let commit = next_commit(&draft());
        assert!(matches!(
            repo.commit(&commit).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
