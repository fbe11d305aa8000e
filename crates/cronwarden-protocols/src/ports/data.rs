//! Data dependency oracle port.

use async_trait::async_trait;

use crate::error::PortError;
use crate::job::DataDependency;

/// Answers whether a data dependency currently holds.
#[async_trait]
pub trait DataDependencyOraclePort: Send + Sync {
    /// Check one dependency. Transient failures surface as `PortError::Unavailable`.
    async fn check(&self, dependency: &DataDependency) -> Result<bool, PortError>;
}
