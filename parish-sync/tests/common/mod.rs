//! Shared fixtures for the sync engine integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parish_sync::*;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One call received by [`ScriptedRemote`]
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    Create { collection: String, fields: Fields },
    Update { collection: String, id: String, patch: Fields },
    Delete { collection: String, id: String },
    FetchAll { collection: String },
}

impl RemoteCall {
    pub fn collection(&self) -> &str {
        match self {
            RemoteCall::Create { collection, .. }
            | RemoteCall::Update { collection, .. }
            | RemoteCall::Delete { collection, .. }
            | RemoteCall::FetchAll { collection } => collection,
        }
    }
}

#[derive(Default)]
struct RemoteState {
    tables: HashMap<String, Vec<EntityRecord>>,
    next_id: u64,
    calls: Vec<RemoteCall>,
    scripted_failures: VecDeque<RemoteError>,
    unavailable: HashSet<String>,
    rejected_ids: HashSet<(String, String)>,
    delay: Option<Duration>,
    fetch_delay: Option<Duration>,
}

/// In-memory remote store that records every call and can be told to
/// fail. Ids are assigned sequentially as strings, starting at `next_id`.
pub struct ScriptedRemote {
    state: Mutex<RemoteState>,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(next_id: u64) -> Self {
        Self {
            state: Mutex::new(RemoteState {
                next_id,
                ..Default::default()
            }),
        }
    }

    pub fn seed(&self, collection: &str, rows: Vec<Value>) {
        let rows = rows
            .into_iter()
            .map(|row| EntityRecord::from_value(row).unwrap())
            .collect();
        self.state.lock().unwrap().tables.insert(collection.to_string(), rows);
    }

    /// Fail the next call with `err`, whatever it is.
    pub fn fail_next(&self, err: RemoteError) {
        self.state.lock().unwrap().scripted_failures.push_back(err);
    }

    /// Every call on `collection` fails as unreachable until cleared.
    pub fn set_unavailable(&self, collection: &str, unavailable: bool) {
        let mut state = self.state.lock().unwrap();
        if unavailable {
            state.unavailable.insert(collection.to_string());
        } else {
            state.unavailable.remove(collection);
        }
    }

    /// Updates of this id are refused.
    pub fn reject_updates_of(&self, collection: &str, id: &str) {
        self.state
            .lock()
            .unwrap()
            .rejected_ids
            .insert((collection.to_string(), id.to_string()));
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = Some(delay);
    }

    /// Delay only `fetch_all`. The rows returned are those present when
    /// the call arrived, like a slow response carrying an older snapshot.
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.state.lock().unwrap().fetch_delay = Some(delay);
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls that write, in arrival order
    pub fn writes(&self) -> Vec<RemoteCall> {
        self.calls()
            .into_iter()
            .filter(|call| !matches!(call, RemoteCall::FetchAll { .. }))
            .collect()
    }

    pub fn rows(&self, collection: &str) -> Vec<EntityRecord> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    async fn begin(&self, call: RemoteCall) -> RemoteResult<()> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            let collection = call.collection().to_string();
            let delay = match call {
                RemoteCall::FetchAll { .. } => state.fetch_delay.or(state.delay),
                _ => state.delay,
            };
            state.calls.push(call);

            if let Some(err) = state.scripted_failures.pop_front() {
                return Err(err);
            }
            if state.unavailable.contains(&collection) {
                return Err(RemoteError::Unavailable(format!("{} unreachable", collection)));
            }
            delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for ScriptedRemote {
    async fn create(&self, collection: &str, fields: &Fields) -> RemoteResult<EntityRecord> {
        self.begin(RemoteCall::Create {
            collection: collection.to_string(),
            fields: fields.clone(),
        })
        .await?;

        let mut state = self.state.lock().unwrap();
        let id = state.next_id.to_string();
        state.next_id += 1;

        let mut fields = fields.clone();
        fields.insert("created_at".to_string(), Value::String("2024-06-02T09:00:00Z".to_string()));
        let record = EntityRecord::new(id, fields);

        state
            .tables
            .entry(collection.to_string())
            .or_default()
            .insert(0, record.clone());
        Ok(record)
    }

    async fn update(&self, collection: &str, id: &str, patch: &Fields) -> RemoteResult<EntityRecord> {
        self.begin(RemoteCall::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            patch: patch.clone(),
        })
        .await?;

        let mut state = self.state.lock().unwrap();
        if state.rejected_ids.contains(&(collection.to_string(), id.to_string())) {
            return Err(RemoteError::Rejected(format!("update of {} {} refused", collection, id)));
        }

        let row = state
            .tables
            .get_mut(collection)
            .and_then(|rows| rows.iter_mut().find(|row| row.id == id))
            .ok_or_else(|| RemoteError::Rejected(format!("no {} row with id {}", collection, id)))?;
        row.merge(patch);
        Ok(row.clone())
    }

    async fn delete(&self, collection: &str, id: &str) -> RemoteResult<()> {
        self.begin(RemoteCall::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        })
        .await?;

        let mut state = self.state.lock().unwrap();
        if let Some(rows) = state.tables.get_mut(collection) {
            rows.retain(|row| row.id != id);
        }
        Ok(())
    }

    async fn fetch_all(&self, collection: &str) -> RemoteResult<Vec<EntityRecord>> {
        let snapshot = self.rows(collection);
        self.begin(RemoteCall::FetchAll {
            collection: collection.to_string(),
        })
        .await?;

        Ok(snapshot)
    }
}

/// Key-value store whose cache writes can be made to fail; queue writes
/// always succeed.
#[derive(Default)]
pub struct FlakyCacheStorage {
    inner: MemoryKeyValueStore,
    fail_cache_writes: AtomicBool,
}

impl FlakyCacheStorage {
    pub fn fail_cache_writes(&self, fail: bool) {
        self.fail_cache_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyValueStore for FlakyCacheStorage {
    async fn get(&self, key: &str) -> SyncResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &str) -> SyncResult<()> {
        if key.starts_with("cache:") && self.fail_cache_writes.load(Ordering::SeqCst) {
            return Err(SyncError::InvalidOperation("disk full".to_string()));
        }
        self.inner.put(key, value).await
    }
}

pub fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {}", other),
    }
}

pub struct Harness {
    pub engine: Arc<SyncEngine>,
    pub remote: Arc<ScriptedRemote>,
    pub network: Arc<ConnectivityMonitor>,
    pub storage: Arc<MemoryKeyValueStore>,
}

impl Harness {
    pub async fn new(online: bool) -> Self {
        Self::with(ScriptedRemote::new(), online, SyncConfig::default()).await
    }

    pub async fn with(remote: ScriptedRemote, online: bool, config: SyncConfig) -> Self {
        let remote = Arc::new(remote);
        let network = Arc::new(ConnectivityMonitor::new(online));
        let storage = Arc::new(MemoryKeyValueStore::new());

        let engine = SyncEngine::new(remote.clone(), network.clone(), storage.clone(), config)
            .await
            .unwrap();

        Self {
            engine: Arc::new(engine),
            remote,
            network,
            storage,
        }
    }

    /// A second engine over the same storage, as after an app restart
    pub async fn restart(&self) -> SyncEngine {
        SyncEngine::new(
            self.remote.clone(),
            self.network.clone(),
            self.storage.clone(),
            self.engine.config().clone(),
        )
        .await
        .unwrap()
    }
}
