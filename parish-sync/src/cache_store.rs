//! Local cache of entity records, one newest-first list per collection

use crate::error::{SyncError, SyncResult};
use crate::record::{EntityRecord, Fields};
use crate::storage::KeyValueStore;
use std::sync::Arc;

const CACHE_KEY_PREFIX: &str = "cache:";

/// Persistent `collection -> records` map.
///
/// Only the sync engine writes through this type; everything else reads
/// via [`crate::SyncEngine::list`].
#[derive(Clone)]
pub struct LocalCacheStore {
    kv: Arc<dyn KeyValueStore>,
}

impl LocalCacheStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Cached records of a collection, newest first.
    ///
    /// Never fails: unreadable or malformed state is logged and read as
    /// empty.
    pub async fn read(&self, collection: &str) -> Vec<EntityRecord> {
        let key = cache_key(collection);

        let raw = match self.kv.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(err) => {
                tracing::warn!(collection, error = %err, "Cache read failed; treating as empty");
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<EntityRecord>>(&raw) {
            Ok(records) => records,
            Err(err) => {
                let corruption = SyncError::CacheCorruption {
                    key,
                    reason: err.to_string(),
                };
                tracing::warn!(collection, error = %corruption, "Discarding corrupt cache entry");
                Vec::new()
            }
        }
    }

    /// Replace the stored list of a collection.
    pub async fn write(&self, collection: &str, records: &[EntityRecord]) -> SyncResult<()> {
        let raw = serde_json::to_string(records)?;
        self.kv.put(&cache_key(collection), &raw).await
    }
}

fn cache_key(collection: &str) -> String {
    format!("{CACHE_KEY_PREFIX}{collection}")
}

/// Put `record` at the front, dropping any older entry with the same id.
pub(crate) fn prepend(records: &mut Vec<EntityRecord>, record: EntityRecord) {
    records.retain(|r| r.id != record.id);
    records.insert(0, record);
}

/// Replace the entry with the record's id in place; prepend when absent.
pub(crate) fn replace(records: &mut Vec<EntityRecord>, record: EntityRecord) {
    match records.iter().position(|r| r.id == record.id) {
        Some(index) => {
            records.retain(|r| r.id != record.id);
            records.insert(index.min(records.len()), record);
        }
        None => records.insert(0, record),
    }
}

/// Swap the entry `old_id` for `record`, keeping its position. Returns
/// false when `old_id` is not cached.
pub(crate) fn replace_id(records: &mut Vec<EntityRecord>, old_id: &str, record: EntityRecord) -> bool {
    let Some(index) = records.iter().position(|r| r.id == old_id) else {
        return false;
    };
    records.retain(|r| r.id != old_id && r.id != record.id);
    records.insert(index.min(records.len()), record);
    true
}

/// Shallow-merge a patch into the cached entry; `None` when not cached.
pub(crate) fn merge(records: &mut [EntityRecord], id: &str, patch: &Fields) -> Option<EntityRecord> {
    let record = records.iter_mut().find(|r| r.id == id)?;
    record.merge(patch);
    Some(record.clone())
}

pub(crate) fn remove(records: &mut Vec<EntityRecord>, id: &str) {
    records.retain(|r| r.id != id);
}
