//! File backed deployment repository.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cronwarden_protocols::{DeploymentId, DeploymentRecord, DeploymentStatus, Environment, JobId};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::DeployError;
use crate::repository::DeploymentRepository;

/// Deployment records as `{storage_path}/deployments/{deployment_id}.json`.
///
/// Every read goes to disk, so a long-running scheduler sees deployments
/// written by other processes sharing the directory.
pub struct FileDeploymentRepository {
    dir: PathBuf,
}

impl FileDeploymentRepository {
    /// Open the repository, creating its directory.
    pub async fn new(storage_path: impl Into<PathBuf>) -> Result<Self, DeployError> {
        let dir = storage_path.into().join("deployments");
        fs::create_dir_all(&dir).await?;
        debug!("FileDeploymentRepository opened at {:?}", dir);
        Ok(Self { dir })
    }

    fn record_path(&self, id: &DeploymentId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    async fn write(&self, record: &DeploymentRecord) -> Result<(), DeployError> {
        let path = self.record_path(&record.deployment_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(record)?).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn read(path: &Path) -> Result<Option<DeploymentRecord>, DeployError> {
        match fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Records matching `keep`, oldest first. Unreadable files are skipped.
    async fn scan<F>(&self, keep: F) -> Result<Vec<DeploymentRecord>, DeployError>
    where
        F: Fn(&DeploymentRecord) -> bool + Send,
    {
        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match Self::read(&path).await {
                Ok(Some(record)) if keep(&record) => records.push(record),
                Ok(_) => {}
                Err(e) => warn!("Failed to read deployment record {:?}: {}", path, e),
            }
        }
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }
}

#[async_trait]
impl DeploymentRepository for FileDeploymentRepository {
    async fn insert(&self, record: &DeploymentRecord) -> Result<(), DeployError> {
        self.write(record).await
    }

    async fn update(&self, record: &DeploymentRecord) -> Result<(), DeployError> {
        if !fs::try_exists(self.record_path(&record.deployment_id)).await? {
            return Err(DeployError::DeploymentNotFound(record.deployment_id));
        }
        self.write(record).await
    }

    async fn get(&self, id: &DeploymentId) -> Result<Option<DeploymentRecord>, DeployError> {
        Self::read(&self.record_path(id)).await
    }

    async fn list_for_job(&self, job_id: &JobId) -> Result<Vec<DeploymentRecord>, DeployError> {
        self.scan(|r| r.job_id == *job_id).await
    }

    async fn find(
        &self,
        job_id: &JobId,
        environment: Environment,
        status: DeploymentStatus,
    ) -> Result<Vec<DeploymentRecord>, DeployError> {
        self.scan(|r| r.job_id == *job_id && r.environment == environment && r.status == status)
            .await
    }

    async fn list_by_status(
        &self,
        status: DeploymentStatus,
    ) -> Result<Vec<DeploymentRecord>, DeployError> {
        self.scan(|r| r.status == status).await
    }
}
