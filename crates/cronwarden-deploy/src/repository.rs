//! Deployment record persistence.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use cronwarden_protocols::{DeploymentId, DeploymentRecord, DeploymentStatus, Environment, JobId};
use tokio::sync::RwLock;

use crate::error::DeployError;

/// Storage for deployment records.
#[async_trait]
pub trait DeploymentRepository: Send + Sync {
    /// Store a new record.
    async fn insert(&self, record: &DeploymentRecord) -> Result<(), DeployError>;

    /// Replace an existing record.
    async fn update(&self, record: &DeploymentRecord) -> Result<(), DeployError>;

    async fn get(&self, id: &DeploymentId) -> Result<Option<DeploymentRecord>, DeployError>;

    /// Every record of a job, oldest first.
    async fn list_for_job(&self, job_id: &JobId) -> Result<Vec<DeploymentRecord>, DeployError>;

    /// Records of a job in an environment with a given status, oldest first.
    async fn find(
        &self,
        job_id: &JobId,
        environment: Environment,
        status: DeploymentStatus,
    ) -> Result<Vec<DeploymentRecord>, DeployError>;

    /// Every record with a given status, oldest first.
    async fn list_by_status(
        &self,
        status: DeploymentStatus,
    ) -> Result<Vec<DeploymentRecord>, DeployError>;
}

type IndexKey = (JobId, Environment, DeploymentStatus);

#[derive(Default)]
struct Indexed {
    records: HashMap<DeploymentId, DeploymentRecord>,
    by_status: HashMap<IndexKey, BTreeSet<DeploymentId>>,
}

impl Indexed {
    fn key(record: &DeploymentRecord) -> IndexKey {
        (record.job_id, record.environment, record.status)
    }

    fn put(&mut self, record: &DeploymentRecord) {
        if let Some(old) = self.records.get(&record.deployment_id) {
            let old_key = Self::key(old);
            if let Some(ids) = self.by_status.get_mut(&old_key) {
                ids.remove(&record.deployment_id);
                if ids.is_empty() {
                    self.by_status.remove(&old_key);
                }
            }
        }
        self.by_status
            .entry(Self::key(record))
            .or_default()
            .insert(record.deployment_id);
        self.records.insert(record.deployment_id, record.clone());
    }

    fn collect<'a>(&self, ids: impl Iterator<Item = &'a DeploymentId>) -> Vec<DeploymentRecord> {
        let mut records: Vec<_> = ids.filter_map(|id| self.records.get(id).cloned()).collect();
        records.sort_by_key(|r| r.timestamp);
        records
    }
}

/// In-memory deployment repository.
#[derive(Default)]
pub struct MemoryDeploymentRepository {
    state: RwLock<Indexed>,
}

impl MemoryDeploymentRepository {
    /// Create a new memory repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentRepository for MemoryDeploymentRepository {
    async fn insert(&self, record: &DeploymentRecord) -> Result<(), DeployError> {
        self.state.write().await.put(record);
        Ok(())
    }

    async fn update(&self, record: &DeploymentRecord) -> Result<(), DeployError> {
        let mut state = self.state.write().await;
        if !state.records.contains_key(&record.deployment_id) {
            return Err(DeployError::DeploymentNotFound(record.deployment_id));
        }
        state.put(record);
        Ok(())
    }

    async fn get(&self, id: &DeploymentId) -> Result<Option<DeploymentRecord>, DeployError> {
        Ok(self.state.read().await.records.get(id).cloned())
    }

    async fn list_for_job(&self, job_id: &JobId) -> Result<Vec<DeploymentRecord>, DeployError> {
        let state = self.state.read().await;
        let ids = state
            .records
            .values()
            .filter(|r| r.job_id == *job_id)
            .map(|r| &r.deployment_id);
        Ok(state.collect(ids))
    }

    async fn find(
        &self,
        job_id: &JobId,
        environment: Environment,
        status: DeploymentStatus,
    ) -> Result<Vec<DeploymentRecord>, DeployError> {
        let state = self.state.read().await;
        let Some(ids) = state.by_status.get(&(*job_id, environment, status)) else {
            return Ok(Vec::new());
        };
        Ok(state.collect(ids.iter()))
    }

    async fn list_by_status(
        &self,
        status: DeploymentStatus,
    ) -> Result<Vec<DeploymentRecord>, DeployError> {
        let state = self.state.read().await;
        let ids = state
            .by_status
            .iter()
            .filter(|((_, _, s), _)| *s == status)
            .flat_map(|(_, ids)| ids.iter());
        Ok(state.collect(ids))
    }
}
