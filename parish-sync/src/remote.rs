//! The authoritative remote store the engine writes through

use crate::error::SyncError;
use crate::record::{EntityRecord, Fields};
use async_trait::async_trait;
use thiserror::Error;

/// Failure of a remote call, split by whether a retry can help
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Not reached, timed out, or temporarily refusing service
    #[error("{0}")]
    Unavailable(String),

    /// Reached, and the operation itself was refused
    #[error("{0}")]
    Rejected(String),
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Unavailable(msg) => SyncError::RemoteUnavailable(msg),
            RemoteError::Rejected(msg) => SyncError::RemoteRejected(msg),
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// CRUD access to the remote relational store, per collection.
///
/// Implementations return the authoritative record, including the
/// server-assigned id and server-computed fields.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn create(&self, collection: &str, fields: &Fields) -> RemoteResult<EntityRecord>;

    async fn update(&self, collection: &str, id: &str, patch: &Fields) -> RemoteResult<EntityRecord>;

    async fn delete(&self, collection: &str, id: &str) -> RemoteResult<()>;

    async fn fetch_all(&self, collection: &str) -> RemoteResult<Vec<EntityRecord>>;
}
