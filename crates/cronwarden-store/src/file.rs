//! File backed job repository.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cronwarden_protocols::{JobDefinition, JobId, LifecycleStatus, VersionRecord};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::repository::{check_head, JobRepository, VersionCommit};

/// Outcome of a recovery pass over leftover staging records.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Commits rolled forward.
    pub completed: Vec<JobId>,
    /// Stale staging records removed without applying them.
    pub discarded: Vec<JobId>,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty() && self.discarded.is_empty()
    }
}

/// File system based job repository.
///
/// ```text
/// {storage_path}/
/// ├── job_definitions/
/// │   └── {job_id}.json
/// ├── job_versions/
/// │   └── {job_id}/
/// │       ├── 000001.json
/// │       └── ...
/// └── staging/
///     └── {job_id}.json
/// ```
///
/// A commit writes its staging record first, then the version file, then the
/// definition (via rename), and finally removes the staging record. Writers in
/// one process are serialized; versions are checked under that lock.
pub struct FileJobRepository {
    storage_path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileJobRepository {
    /// Open a repository, creating its directories and recovering any
    /// interrupted commits.
    pub async fn new(storage_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let storage_path = storage_path.into();
        let repo = Self {
            storage_path,
            write_lock: Mutex::new(()),
        };

        fs::create_dir_all(repo.definitions_dir()).await?;
        fs::create_dir_all(repo.versions_root()).await?;
        fs::create_dir_all(repo.staging_dir()).await?;

        let report = repo.recover().await?;
        if !report.is_empty() {
            info!(
                "Recovered job store at {:?}: {} completed, {} discarded",
                repo.storage_path,
                report.completed.len(),
                report.discarded.len()
            );
        }
        debug!("FileJobRepository initialized at {:?}", repo.storage_path);
        Ok(repo)
    }

    fn definitions_dir(&self) -> PathBuf {
        self.storage_path.join("job_definitions")
    }

    fn versions_root(&self) -> PathBuf {
        self.storage_path.join("job_versions")
    }

    fn staging_dir(&self) -> PathBuf {
        self.storage_path.join("staging")
    }

    fn definition_path(&self, id: &JobId) -> PathBuf {
        self.definitions_dir().join(format!("{}.json", id))
    }

    fn versions_dir(&self, id: &JobId) -> PathBuf {
        self.versions_root().join(id.to_string())
    }

    fn version_path(&self, id: &JobId, version: u32) -> PathBuf {
        self.versions_dir(id).join(format!("{:06}.json", version))
    }

    pub(crate) fn staging_path(&self, id: &JobId) -> PathBuf {
        self.staging_dir().join(format!("{}.json", id))
    }

    /// Complete or discard every leftover staging record.
    ///
    /// A staged commit is rolled forward when the stored definition is still
    /// at the staged base version, treated as done when the definition already
    /// carries the staged version, and discarded otherwise.
    pub async fn recover(&self) -> Result<RecoveryReport, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut report = RecoveryReport::default();

        let mut entries = fs::read_dir(self.staging_dir()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }

            let commit: VersionCommit = match read_json(&path).await {
                Ok(commit) => commit,
                Err(e) => {
                    warn!("Discarding unreadable staging record {:?}: {}", path, e);
                    fs::remove_file(&path).await?;
                    continue;
                }
            };

            let id = commit.job_id();
            let current = self.read_definition(&id).await?;
            match current.map(|d| d.current_version) {
                Some(v) if v == commit.expected_version => {
                    self.apply(&commit).await?;
                    report.completed.push(id);
                }
                Some(v) if v == commit.definition.current_version => {
                    let version_path = self.version_path(&id, commit.superseded.version);
                    if !fs::try_exists(&version_path).await? {
                        self.write_version(&commit.superseded).await?;
                    }
                    report.completed.push(id);
                }
                other => {
                    warn!(
                        "Discarding stale staging record for job {} (base {}, stored {:?})",
                        id, commit.expected_version, other
                    );
                    report.discarded.push(id);
                }
            }
            fs::remove_file(&path).await?;
        }

        Ok(report)
    }

    async fn read_definition(&self, id: &JobId) -> Result<Option<JobDefinition>, StoreError> {
        let path = self.definition_path(id);
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }
        Ok(Some(read_json(&path).await?))
    }

    async fn write_definition(&self, definition: &JobDefinition) -> Result<(), StoreError> {
        write_json_atomic(&self.definition_path(&definition.id), definition).await
    }

    async fn write_version(&self, record: &VersionRecord) -> Result<(), StoreError> {
        fs::create_dir_all(self.versions_dir(&record.job_id)).await?;
        write_json_atomic(&self.version_path(&record.job_id, record.version), record).await
    }

    /// Apply the version and definition writes of a staged commit.
    async fn apply(&self, commit: &VersionCommit) -> Result<(), StoreError> {
        self.write_version(&commit.superseded).await?;
        self.write_definition(&commit.definition).await
    }
}

#[async_trait]
impl JobRepository for FileJobRepository {
    async fn insert(&self, definition: &JobDefinition) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        if fs::try_exists(self.definition_path(&definition.id)).await? {
            return Err(StoreError::AlreadyExists(definition.id));
        }
        fs::create_dir_all(self.versions_dir(&definition.id)).await?;
        self.write_definition(definition).await?;
        debug!("Inserted job '{}'", definition.id);
        Ok(())
    }

    async fn load(&self, id: &JobId) -> Result<Option<JobDefinition>, StoreError> {
        self.read_definition(id).await
    }

    async fn load_all(&self) -> Result<Vec<JobDefinition>, StoreError> {
        let mut definitions = Vec::new();
        let mut entries = fs::read_dir(self.definitions_dir()).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match read_json::<JobDefinition>(&path).await {
                Ok(definition) => definitions.push(definition),
                Err(e) => warn!("Failed to read job definition {:?}: {}", path, e),
            }
        }

        Ok(definitions)
    }

    async fn commit(&self, commit: &VersionCommit) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let id = commit.job_id();
        let current = self
            .read_definition(&id)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        commit.check(&current)?;

        let staging = self.staging_path(&id);
        write_json_atomic(&staging, commit).await?;
        self.apply(commit).await?;
        fs::remove_file(&staging).await?;

        debug!(
            "Committed job '{}' version {}",
            id, commit.definition.current_version
        );
        Ok(())
    }

    async fn update_head(
        &self,
        expected_version: u32,
        expected_status: LifecycleStatus,
        definition: &JobDefinition,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let current = self
            .read_definition(&definition.id)
            .await?
            .ok_or(StoreError::NotFound(definition.id))?;
        check_head(&current, expected_version, expected_status)?;
        self.write_definition(definition).await
    }

    async fn versions(&self, id: &JobId) -> Result<Vec<VersionRecord>, StoreError> {
        let dir = self.versions_dir(id);
        if !fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }

        let mut versions = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if parse_version_filename(&path).is_none() {
                continue;
            }
            versions.push(read_json::<VersionRecord>(&path).await?);
        }

        versions.sort_by_key(|r| r.version);
        Ok(versions)
    }
}

/// Parse `{version:06}.json`.
fn parse_version_filename(path: &Path) -> Option<u32> {
    let name = path.file_name()?.to_str()?;
    name.strip_suffix(".json")?.parse().ok()
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let content = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

/// Write to a sibling temp file, then rename over the target.
async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let content = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
#[path = "file_tests.rs"]
mod tests;
