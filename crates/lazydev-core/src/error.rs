use thiserror::Error;

#[derive(Debug, Error)]
pub enum LazydevError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LazydevError {
    /// Short error code string sent to clients alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            LazydevError::Config(_) => "CONFIG_ERROR",
            LazydevError::Validation(_) => "VALIDATION_ERROR",
            LazydevError::Unauthorized(_) => "UNAUTHORIZED",
            LazydevError::JobNotFound { .. } => "JOB_NOT_FOUND",
            LazydevError::Database(_) => "DATABASE_ERROR",
            LazydevError::Storage(_) => "STORAGE_ERROR",
            LazydevError::Upstream(_) => "UPSTREAM_ERROR",
            LazydevError::Serialization(_) => "SERIALIZATION_ERROR",
            LazydevError::Io(_) => "IO_ERROR",
            LazydevError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        LazydevError::Validation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, LazydevError>;
