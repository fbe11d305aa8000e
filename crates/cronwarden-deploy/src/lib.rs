//! # Cronwarden Deploy
//!
//! Promotes job versions into environments and reverts them.
//!
//! - [`DeploymentOrchestrator`] arms the current head of a job in an
//!   environment, going through manual approval when the job requires it.
//! - [`RollbackCoordinator`] reverts a job to an earlier version and hands
//!   back a [`PendingRedeploy`] token; re-arming is always a separate call.
//! - [`DeploymentRepository`] persists deployment records with an index on
//!   `(job, environment, status)`.

pub mod error;
pub mod file;
pub mod orchestrator;
pub mod repository;
pub mod rollback;

pub use error::DeployError;
pub use file::FileDeploymentRepository;
pub use orchestrator::{DeploymentOrchestrator, EXECUTOR_ACTOR, SCHEDULER_ACTOR};
pub use repository::{DeploymentRepository, MemoryDeploymentRepository};
pub use rollback::{PendingRedeploy, RollbackCoordinator};
