use thiserror::Error;

/// Failure taxonomy for the sync subsystem. Per-record failures inside a
/// bulk sync are not errors at this level; they come back as data in
/// `SyncOutcome.errors`.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("not connected: {0}")]
    Auth(String),
    #[error("external request failed: {0}")]
    Network(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SyncError {
    /// True when the caller should redirect to re-authorization instead of
    /// retrying the operation.
    pub fn reconnect_required(&self) -> bool {
        matches!(self, SyncError::Auth(_))
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
