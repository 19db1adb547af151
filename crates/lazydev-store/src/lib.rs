//! `lazydev-store`: durable job state and uploaded archives.
//!
//! # Overview
//!
//! Jobs and their commit records live in two SQLite tables (`jobs`,
//! `commits`). [`store::JobStore`] is the only writer: every state change is
//! one transaction guarded by the expected pre-state, so a transition applied
//! twice is a no-op the second time and a cancellation racing a firing is
//! serialized by the connection mutex.
//!
//! Archives are plain files under a root directory, addressed by a key of the
//! form `jobs/<job_id>/source.zip` ([`archive::ArchiveStore`]).

pub mod archive;
pub mod db;
pub mod error;
pub mod store;

pub use archive::ArchiveStore;
pub use error::{Result, StoreError};
pub use store::{BeginCommit, CancelRequest, CommitTarget, CompleteCommit, JobStore};
