//! Mutations submitted to the engine and their queued form

use crate::error::{SyncError, SyncResult};
use crate::record::Fields;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Operation kind of a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(OperationType::Create),
            "update" => Ok(OperationType::Update),
            "delete" => Ok(OperationType::Delete),
            _ => Err(SyncError::InvalidOperation(format!("Unknown operation type: {}", s))),
        }
    }
}

/// A requested change to one collection.
///
/// CREATE never names a target and DELETE never carries fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Mutation {
    Create { fields: Fields },
    Update { target_id: String, patch: Fields },
    Delete { target_id: String },
}

impl Mutation {
    pub fn create(fields: Fields) -> Self {
        Mutation::Create { fields }
    }

    pub fn update(target_id: impl Into<String>, patch: Fields) -> Self {
        Mutation::Update {
            target_id: target_id.into(),
            patch,
        }
    }

    pub fn delete(target_id: impl Into<String>) -> Self {
        Mutation::Delete {
            target_id: target_id.into(),
        }
    }

    pub fn operation(&self) -> OperationType {
        match self {
            Mutation::Create { .. } => OperationType::Create,
            Mutation::Update { .. } => OperationType::Update,
            Mutation::Delete { .. } => OperationType::Delete,
        }
    }

    pub fn target_id(&self) -> Option<&str> {
        match self {
            Mutation::Create { .. } => None,
            Mutation::Update { target_id, .. } | Mutation::Delete { target_id } => Some(target_id),
        }
    }

    /// Field payload for logging; `None` for DELETE.
    pub fn payload(&self) -> Option<&Fields> {
        match self {
            Mutation::Create { fields } => Some(fields),
            Mutation::Update { patch, .. } => Some(patch),
            Mutation::Delete { .. } => None,
        }
    }

    pub(crate) fn retarget(&mut self, from: &str, to: &str) -> bool {
        match self {
            Mutation::Update { target_id, .. } | Mutation::Delete { target_id } if target_id.as_str() == from => {
                *target_id = to.to_string();
                true
            }
            _ => false,
        }
    }

    /// Reject shapes the remote store could never accept.
    pub fn validate(&self) -> SyncResult<()> {
        match self {
            Mutation::Create { fields } if fields.contains_key("id") => Err(SyncError::InvalidOperation(
                "create payload must not carry an id".to_string(),
            )),
            Mutation::Update { target_id, .. } | Mutation::Delete { target_id } if target_id.trim().is_empty() => {
                Err(SyncError::InvalidOperation(format!(
                    "{} requires a target id",
                    self.operation()
                )))
            }
            Mutation::Update { patch, .. } if patch.is_empty() => Err(SyncError::InvalidOperation(
                "update patch is empty".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// A mutation waiting in the queue for the remote store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
    /// Queue-local sequence number; defines drain order
    pub id: u64,

    /// Target collection (e.g. "members", "events", "attendance")
    pub collection: String,

    pub mutation: Mutation,

    /// When the mutation was queued
    pub enqueued_at: DateTime<Utc>,

    /// Number of failed drain attempts
    pub attempts: u32,

    /// Last error message (if any)
    pub last_error: Option<String>,
}

impl PendingMutation {
    pub fn operation(&self) -> OperationType {
        self.mutation.operation()
    }

    pub fn target_id(&self) -> Option<&str> {
        self.mutation.target_id()
    }
}

/// Why a mutation left the retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// The remote store refused it; retrying cannot help
    Rejected,
    /// Transient failures reached the attempt ceiling
    RetriesExhausted,
    /// Targets a record whose CREATE never synced
    AwaitingCreate,
}

/// A mutation parked for manual resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub mutation: PendingMutation,
    pub reason: DeadLetterReason,
    pub error: String,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn to_error(&self) -> SyncError {
        SyncError::DrainFailure {
            mutation_id: self.mutation.id,
            attempts: self.mutation.attempts,
            reason: self.error.clone(),
        }
    }
}
