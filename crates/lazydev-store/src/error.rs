use lazydev_core::LazydevError;
use thiserror::Error;

/// Errors that can occur within the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No job with the given ID exists.
    #[error("job not found: {id}")]
    JobNotFound { id: String },

    /// Archive file I/O failed.
    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An archive key that would resolve outside the archive root.
    #[error("invalid archive key: {0}")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for LazydevError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::JobNotFound { id } => LazydevError::JobNotFound { id },
            StoreError::Database(e) => LazydevError::Database(e.to_string()),
            StoreError::Io(e) => LazydevError::Storage(e.to_string()),
            StoreError::InvalidKey(k) => LazydevError::Storage(format!("invalid archive key: {k}")),
        }
    }
}
