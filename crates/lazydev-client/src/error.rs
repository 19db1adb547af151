use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The server rejected the credential (401).
    #[error("unauthorized: credential rejected, log in again")]
    Unauthorized,

    /// No credential held; the session must log in first.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Any other non-success response, with the server's error body.
    #[error("{message} ({status})")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// Whether the caller has to re-authenticate before trying again.
    pub fn needs_login(&self) -> bool {
        matches!(self, ClientError::Unauthorized | ClientError::NotAuthenticated)
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
