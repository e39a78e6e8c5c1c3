use thiserror::Error;

/// Result type alias for flowcore operations.
pub type Result<T> = std::result::Result<T, FlowcoreError>;

#[derive(Error, Debug)]
pub enum FlowcoreError {
    #[error("no handler registered for event type: {0}")]
    UnhandledEventType(String),

    #[error("session {0} has no runs")]
    NoRuns(String),

    #[error("unknown status: {0}")]
    UnknownStatus(String),

    #[error("unknown session type: {0}")]
    UnknownSessionType(String),

    #[error("unknown fire type: {0}")]
    UnknownFireType(String),

    #[error("no commit hook registered with id: {0}")]
    UnknownHook(String),

    #[error("unknown flow: {0}")]
    UnknownFlow(String),

    #[error("session {0} is no longer waiting")]
    SessionNotWaiting(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
