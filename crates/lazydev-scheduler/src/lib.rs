//! `lazydev-scheduler`: fires each job's commits in order, at their scheduled time.
//!
//! # Overview
//!
//! The [`engine::SchedulerEngine`] owns a priority queue keyed by each active
//! job's next fire time (monotonic clock). When an entry comes due it hands
//! `(job, index)` to the [`runner::JobRunner`], which drives the record through
//! the store's guarded transitions and the [`executor::CommitExecutor`], then
//! reports back what should happen next.
//!
//! | Piece        | Responsibility                                             |
//! |--------------|------------------------------------------------------------|
//! | `engine`     | when: queue, re-keying, cancellation, restart recovery     |
//! | `runner`     | what: one firing event, exactly once, in order             |
//! | `schedule`   | fire-delay arithmetic                                      |
//! | `executor`   | the push capability (trait); `git` is the real one         |
//! | `notify`     | job / commit event sinks                                   |

pub mod engine;
pub mod error;
pub mod executor;
pub mod git;
pub mod notify;
pub mod queue;
pub mod runner;
pub mod schedule;
mod workspace;

pub use engine::{SchedulerCommand, SchedulerEngine, SchedulerHandle};
pub use error::{Result, SchedulerError};
pub use executor::{CommitExecutor, CommitReceipt, CommitRequest, ExecutorError};
pub use git::GitExecutor;
pub use notify::{JobEvent, LogNotifier, MultiNotifier, Notifier, WebhookNotifier};
pub use runner::{FireOutcome, JobRunner};
