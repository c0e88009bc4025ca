//! Conversion job lifecycle.
//!
//! [`ConversionManager`] ties the pieces together: jobs are registered in the
//! [`JobRegistry`], resolved, gated by the [`AdmissionLimiter`], transcoded,
//! and eventually reclaimed by the [`RetentionSweeper`].

pub mod job;
pub mod limiter;
pub mod manager;
pub mod progress;
pub mod registry;
pub mod sweeper;

pub use job::{Job, JobFailure, JobId, JobStatus, OUTPUT_EXTENSION};
pub use limiter::{AdmissionLimiter, AdmissionSlot};
pub use manager::ConversionManager;
pub use progress::ProgressReporter;
pub use registry::{JobCounts, JobRegistry};
pub use sweeper::{RetentionSweeper, SweepReport};
