//! Typed entity services over the sync engine
//!
//! Each collection the app edits (members, events, attendance) gets an
//! [`EntityService`] that validates input, converts it to the engine's
//! untyped field maps and decodes cached records back.

pub mod attendance;
pub mod events;
pub mod members;

use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use crate::mutation::Mutation;
use crate::record::{is_placeholder_id, EntityRecord, Fields};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use validator::Validate;

pub use attendance::{Attendance, AttendancePatch, AttendanceStatus};
pub use events::{Event, EventPatch};
pub use members::{Member, MemberPatch, MembershipStatus};

/// A domain type stored in one remote collection
pub trait Entity: Serialize + DeserializeOwned + Validate + Send + Sync {
    /// Remote collection (table) name
    const COLLECTION: &'static str;

    /// Partial update; unset fields are left untouched
    type Patch: Serialize + Validate + Send + Sync;
}

/// An entity together with its id
#[derive(Debug, Clone, PartialEq)]
pub struct Stored<E> {
    pub id: String,
    pub entity: E,
}

impl<E> Stored<E> {
    /// Created offline and not yet confirmed by the remote store
    pub fn is_pending_sync(&self) -> bool {
        is_placeholder_id(&self.id)
    }
}

/// CRUD for one entity type through the shared [`SyncEngine`]
pub struct EntityService<E: Entity> {
    engine: Arc<SyncEngine>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for EntityService<E> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.engine))
    }
}

impl<E: Entity> EntityService<E> {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self {
            engine,
            _entity: PhantomData,
        }
    }

    pub async fn create(&self, entity: &E) -> SyncResult<Stored<E>> {
        entity.validate()?;
        let fields = to_fields(entity)?;

        let record = self
            .engine
            .submit_mutation(E::COLLECTION, Mutation::create(fields))
            .await?
            .ok_or_else(|| SyncError::InvalidOperation(format!("create on {} returned no record", E::COLLECTION)))?;

        decode(record)
    }

    /// Apply a patch. Returns `None` when the update was queued for a
    /// record that is not cached locally, so no full entity is known yet.
    pub async fn update(&self, id: &str, patch: &E::Patch) -> SyncResult<Option<Stored<E>>> {
        patch.validate()?;
        let fields = to_fields(patch)?;
        if fields.is_empty() {
            return Err(SyncError::Validation("patch changes no fields".to_string()));
        }

        let record = self
            .engine
            .submit_mutation(E::COLLECTION, Mutation::update(id, fields.clone()))
            .await?;

        let Some(record) = record else {
            return Ok(None);
        };
        if echoes_patch(&record, &fields) {
            return Ok(decode(record).ok());
        }

        match decode(record) {
            Ok(stored) => Ok(Some(stored)),
            Err(err) => {
                tracing::warn!(collection = E::COLLECTION, id, error = %err, "Updated record does not decode");
                Ok(None)
            }
        }
    }

    pub async fn delete(&self, id: &str) -> SyncResult<()> {
        self.engine
            .submit_mutation(E::COLLECTION, Mutation::delete(id))
            .await
            .map(|_| ())
    }

    /// Cached entities, newest first. Records that no longer decode are
    /// skipped.
    pub async fn list(&self) -> Vec<Stored<E>> {
        decode_all(self.engine.list(E::COLLECTION).await)
    }

    pub async fn get(&self, id: &str) -> Option<Stored<E>> {
        self.engine
            .list(E::COLLECTION)
            .await
            .into_iter()
            .find(|record| record.id == id)
            .and_then(|record| decode(record).ok())
    }

    /// Reload the collection from the remote store.
    pub async fn refresh(&self) -> SyncResult<Vec<Stored<E>>> {
        Ok(decode_all(self.engine.refresh(E::COLLECTION).await?))
    }
}

fn to_fields<T: Serialize>(value: &T) -> SyncResult<Fields> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(fields) => Ok(fields),
        other => Err(SyncError::Serialization(format!("expected a JSON object, got {}", other))),
    }
}

/// The engine echoes `{id, ...patch}` for a queued update of a record it
/// has not cached; that partial record is not expected to decode.
fn echoes_patch(record: &EntityRecord, patch: &Fields) -> bool {
    record.fields == *patch
}

fn decode<E: Entity>(record: EntityRecord) -> SyncResult<Stored<E>> {
    let entity = serde_json::from_value(serde_json::Value::Object(record.fields))?;
    Ok(Stored { id: record.id, entity })
}

fn decode_all<E: Entity>(records: Vec<EntityRecord>) -> Vec<Stored<E>> {
    records
        .into_iter()
        .filter_map(|record| {
            let id = record.id.clone();
            match decode(record) {
                Ok(stored) => Some(stored),
                Err(err) => {
                    tracing::warn!(collection = E::COLLECTION, id = %id, error = %err, "Skipping undecodable record");
                    None
                }
            }
        })
        .collect()
}
