//! `lazydev-core`: shared model, validation, configuration and error types.
//!
//! Every other crate in the workspace speaks in terms of the types defined
//! here: a [`types::CommitPlan`] is what a client submits, a
//! [`types::JobDetail`] is what the store persists and the Status API serves.

pub mod config;
pub mod error;
pub mod plan;
pub mod types;

pub use error::{LazydevError, Result};
pub use types::{
    CommitPlan, CommitPlanEntry, CommitRecord, CommitStatus, JobDetail, JobStatus, JobSummary,
};
