//! # Cronwarden Scheduler
//!
//! The scheduling tick. Every tick:
//!
//! 1. resumes deployments waiting on an approval,
//! 2. finds the due fire time of every `Scheduled` job,
//! 3. gates all due fires concurrently,
//! 4. arbitrates allowed fires into the available execution slots,
//! 5. cancels replaced runs and triggers execution.
//!
//! A job's cursor starts at the moment the scheduler first sees it armed,
//! so fires from before a deployment (or before a restart) are never
//! replayed. Fires missed between two ticks are coalesced into the latest.

pub mod config;
pub mod error;
pub mod scheduler;

pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use scheduler::{Deferral, Denial, JobScheduler, TickReport};
