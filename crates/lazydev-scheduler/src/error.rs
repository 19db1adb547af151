use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The job store failed.
    #[error("store error: {0}")]
    Store(#[from] lazydev_store::StoreError),

    /// The engine task is gone; commands can no longer be delivered.
    #[error("scheduler engine is not running")]
    EngineStopped,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
