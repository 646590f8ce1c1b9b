use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("parent checkpoint not found: {0}")]
    ParentNotFound(String),

    #[error("append conflict: {0}")]
    Conflict(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("state decode error: {0}")]
    State(#[from] waypoint_types::DecodeError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl StoreError {
    /// Whether a failed append may succeed if retried as-is.
    ///
    /// Chain violations and encoding failures are deterministic; only the
    /// I/O-shaped failures are worth one more attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Persistence(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
