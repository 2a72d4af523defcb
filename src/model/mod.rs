//! Core data model.

pub mod job;

pub use job::{Disposition, JobId, JobRecord, Outcome, PushOptions};
