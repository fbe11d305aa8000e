//! # Cronwarden Store
//!
//! Job Definition Store: the only writer of job definitions and their
//! immutable version history.
//!
//! ## Features
//!
//! - Optimistic concurrency on every save and rollback
//! - Append-only version history; rollback creates a new head version
//! - Field level diffs between any two versions
//! - In-memory and file backed repositories
//! - Write-ahead staging with recovery for the file backend

pub mod diff;
pub mod error;
pub mod file;
pub mod repository;
pub mod store;
pub mod validation;

pub use diff::{diff_specs, FieldChange};
pub use error::StoreError;
pub use file::{FileJobRepository, RecoveryReport};
pub use repository::{JobRepository, MemoryJobRepository, VersionCommit};
pub use store::{JobDefinitionStore, JobFilter};
pub use validation::{parse_schedule, validate_spec};
