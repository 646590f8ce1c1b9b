use thiserror::Error;
use waypoint_store::StoreError;

#[derive(Debug, Error)]
pub enum SessionError {
    /// A generation is already running on the thread; the caller retries
    /// later or reports the thread as busy.
    #[error("a generation is already active for thread {0}")]
    ThreadBusy(String),

    /// The producer aborted the turn; nothing was committed.
    #[error("generation failed: {0}")]
    Generation(#[source] anyhow::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
