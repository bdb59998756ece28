//! Error types for the sync engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The remote store could not be reached, or did not answer in time.
    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    /// The remote store answered and refused the operation.
    #[error("Remote store rejected the operation: {0}")]
    RemoteRejected(String),

    #[error("Queued mutation {mutation_id} failed after {attempts} attempt(s): {reason}")]
    DrainFailure {
        mutation_id: u64,
        attempts: u32,
        reason: String,
    },

    #[error("Corrupt persisted state under '{key}': {reason}")]
    CacheCorruption { key: String, reason: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl SyncError {
    /// Whether retrying the same call later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::RemoteUnavailable(_) | SyncError::Database(_))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<validator::ValidationErrors> for SyncError {
    fn from(err: validator::ValidationErrors) -> Self {
        SyncError::Validation(err.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
