//! # Cronwarden Gating
//!
//! Decides whether a proposed fire time of a job may start a run.
//!
//! Evaluation order:
//!
//! 1. The job must be `Scheduled`, otherwise `Deny`.
//! 2. A required manual approval must be `Approved`, otherwise `Defer`.
//! 3. The concurrency policy is applied to the job's running instances.
//! 4. Every data dependency must hold, otherwise `Defer`.
//! 5. Candidates competing for execution slots are ordered by
//!    [`arbitrate`].
//!
//! Collaborator failures never produce `Deny`; they defer the fire.

pub mod arbitration;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod tracker;

pub use arbitration::{arbitrate, Arbitration, Candidate, SLOTS_EXHAUSTED};
pub use config::GatingConfig;
pub use error::GatingError;
pub use evaluator::GatingEvaluator;
pub use tracker::InstanceTracker;
