//! The sync engine: online/offline routing, queue drain and cache
//! reconciliation
//!
//! Every write to the cache and the queue happens inside the engine's
//! writer section (`writer` lock), which is never held across a remote
//! call. `sync_gate` orders whole remote round trips: drains and refreshes
//! hold it exclusively, online writes share it. Within a drain each
//! collection is processed sequentially and distinct collections
//! concurrently.

use crate::cache_store::{self, LocalCacheStore};
use crate::config::SyncConfig;
use crate::connectivity::ConnectivityOracle;
use crate::error::{SyncError, SyncResult};
use crate::mutation::{DeadLetter, DeadLetterReason, Mutation, PendingMutation};
use crate::mutation_queue::MutationQueue;
use crate::record::{is_placeholder_id, placeholder_references, EntityRecord};
use crate::remote::{RemoteError, RemoteResult, RemoteStore};
use crate::storage::KeyValueStore;
use futures::future::join_all;
use parish_logging::redact_payload;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

/// Outcome counts of one [`SyncEngine::drain_queue`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainSummary {
    /// Mutations confirmed by the remote store and removed from the queue
    pub succeeded: usize,
    /// Failed remote attempts (transient or rejected)
    pub failed: usize,
    /// Mutations still queued after the drain
    pub still_pending: usize,
    /// Mutations moved to the dead-letter list during the drain
    pub dead_lettered: usize,
}

impl DrainSummary {
    fn absorb(&mut self, other: DrainSummary) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.dead_lettered += other.dead_lettered;
    }
}

/// Offline-first mutation engine shared by all entity services
pub struct SyncEngine {
    remote: Arc<dyn RemoteStore>,
    connectivity: Arc<dyn ConnectivityOracle>,
    cache: LocalCacheStore,
    writer: Mutex<MutationQueue>,
    sync_gate: RwLock<()>,
    config: SyncConfig,
}

impl SyncEngine {
    /// Create an engine over explicit collaborators; the queue is loaded
    /// from `storage`.
    pub async fn new(
        remote: Arc<dyn RemoteStore>,
        connectivity: Arc<dyn ConnectivityOracle>,
        storage: Arc<dyn KeyValueStore>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        config.validate()?;

        let queue = MutationQueue::open(Arc::clone(&storage)).await;

        Ok(Self {
            remote,
            connectivity,
            cache: LocalCacheStore::new(storage),
            writer: Mutex::new(queue),
            sync_gate: RwLock::new(()),
            config,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Apply a mutation to `collection`.
    ///
    /// Online, the remote store is written first and its authoritative
    /// record is cached and returned; a remote failure is returned as is.
    /// Offline, the mutation is queued and the optimistic record returned
    /// at once. DELETE returns `None` on both paths.
    pub async fn submit_mutation(&self, collection: &str, mutation: Mutation) -> SyncResult<Option<EntityRecord>> {
        if collection.trim().is_empty() {
            return Err(SyncError::InvalidOperation("collection name is empty".to_string()));
        }
        mutation.validate()?;

        if let Some(payload) = mutation.payload() {
            let references = placeholder_references(payload);
            if !references.is_empty() {
                tracing::warn!(
                    collection,
                    fields = ?references,
                    "Payload references records not yet synced; those ids are not rewritten and the remote store will likely reject them"
                );
            }
        }

        if self.connectivity.is_online() {
            let gate = self.sync_gate.read().await;
            let queue_behind = {
                let queue = self.writer.lock().await;
                queue.has_pending(collection) || mutation.target_id().is_some_and(is_placeholder_id)
            };

            if !queue_behind {
                let result = self.submit_online(collection, mutation).await;
                drop(gate);
                return result;
            }
            drop(gate);

            tracing::debug!(
                collection,
                operation = %mutation.operation(),
                "Collection has queued mutations; queueing behind them"
            );
        }

        self.submit_offline(collection, mutation).await
    }

    async fn submit_online(&self, collection: &str, mutation: Mutation) -> SyncResult<Option<EntityRecord>> {
        let record = match self.dispatch(collection, &mutation).await {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(
                    collection,
                    operation = %mutation.operation(),
                    error = %err,
                    "Remote write failed"
                );
                return Err(err.into());
            }
        };

        let _writer = self.writer.lock().await;
        let mut records = self.cache.read(collection).await;
        match (&mutation, &record) {
            (Mutation::Create { .. }, Some(server)) => cache_store::prepend(&mut records, server.clone()),
            (Mutation::Update { .. }, Some(server)) => cache_store::replace(&mut records, server.clone()),
            (Mutation::Delete { target_id }, _) => cache_store::remove(&mut records, target_id),
            _ => {}
        }
        self.write_cache_logged(collection, &records).await;

        tracing::debug!(
            collection,
            operation = %mutation.operation(),
            id = record.as_ref().map(|r| r.id.as_str()).unwrap_or_default(),
            "Remote write applied"
        );

        Ok(record)
    }

    async fn submit_offline(&self, collection: &str, mutation: Mutation) -> SyncResult<Option<EntityRecord>> {
        let mut queue = self.writer.lock().await;
        let entry = queue.enqueue(collection, mutation).await?;

        tracing::debug!(
            mutation_id = entry.id,
            collection,
            operation = %entry.operation(),
            payload = %entry
                .mutation
                .payload()
                .map(|p| redact_payload(&serde_json::Value::Object(p.clone())))
                .unwrap_or_default(),
            "Queued mutation for later sync"
        );

        let mut records = self.cache.read(collection).await;
        let optimistic = match &entry.mutation {
            Mutation::Create { fields } => {
                let placeholder = queue.placeholder_for(entry.id).ok_or_else(|| {
                    SyncError::InvalidOperation(format!("no placeholder issued for mutation {}", entry.id))
                })?;
                let record = EntityRecord::new(placeholder, fields.clone());
                cache_store::prepend(&mut records, record.clone());
                Some(record)
            }
            Mutation::Update { target_id, patch } => match cache_store::merge(&mut records, target_id, patch) {
                Some(merged) => Some(merged),
                None => {
                    tracing::debug!(collection, id = %target_id, "Update target not cached; queued without local merge");
                    Some(EntityRecord::new(target_id.clone(), patch.clone()))
                }
            },
            Mutation::Delete { target_id } => {
                cache_store::remove(&mut records, target_id);
                None
            }
        };

        self.write_cache_logged(collection, &records).await;
        Ok(optimistic)
    }

    /// Cached records of a collection, newest first. Never calls the
    /// remote store.
    pub async fn list(&self, collection: &str) -> Vec<EntityRecord> {
        self.cache.read(collection).await
    }

    /// Replace the cache of a collection with the remote contents, then
    /// re-apply that collection's still-queued mutations on top.
    ///
    /// Runs exclusively of drains and online writes, so no confirmed
    /// mutation can land between the fetch and the rebase.
    pub async fn refresh(&self, collection: &str) -> SyncResult<Vec<EntityRecord>> {
        if !self.connectivity.is_online() {
            return Err(SyncError::RemoteUnavailable("offline".to_string()));
        }

        let _gate = self.sync_gate.write().await;
        let fetched = self.with_timeout(self.remote.fetch_all(collection)).await?;

        let queue = self.writer.lock().await;
        let records = rebase(fetched, &queue, collection);
        self.cache.write(collection, &records).await?;

        tracing::info!(collection, records = records.len(), "Refreshed cache from remote");

        Ok(records)
    }

    /// Push every queued mutation to the remote store.
    ///
    /// Failures never surface as an error here: they are counted in the
    /// summary and visible through [`Self::pending_mutations`] and
    /// [`Self::dead_letters`].
    pub async fn drain_queue(&self) -> DrainSummary {
        let _gate = self.sync_gate.write().await;

        let collections = self.writer.lock().await.collections_with_pending();
        if collections.is_empty() {
            return DrainSummary::default();
        }

        tracing::info!(collections = collections.len(), "Draining mutation queue");

        let passes = join_all(collections.iter().map(|c| self.drain_collection(c))).await;

        let mut summary = DrainSummary::default();
        for pass in passes {
            summary.absorb(pass);
        }
        summary.still_pending = self.writer.lock().await.pending_count();

        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            still_pending = summary.still_pending,
            dead_lettered = summary.dead_lettered,
            "Drain finished"
        );

        summary
    }

    /// Drain one collection oldest first, stopping at the first transient
    /// failure so nothing overtakes it.
    async fn drain_collection(&self, collection: &str) -> DrainSummary {
        let mut pass = DrainSummary::default();

        loop {
            let Some(entry) = self.writer.lock().await.head(collection) else {
                break;
            };

            if let Some(placeholder) = entry.target_id().filter(|id| is_placeholder_id(id)) {
                // Its CREATE is not ahead in the queue, so it was dead-lettered or discarded.
                let mut queue = self.writer.lock().await;
                let reason = if queue.is_unresolved_placeholder(placeholder) {
                    format!("create of {} is dead-lettered", placeholder)
                } else {
                    format!("create of {} was discarded", placeholder)
                };
                tracing::warn!(
                    mutation_id = entry.id,
                    collection,
                    operation = %entry.operation(),
                    error = %reason,
                    "Queued mutation targets a record that never synced; moving to dead letters"
                );
                if let Err(err) = queue
                    .dead_letter(entry.id, DeadLetterReason::AwaitingCreate, &reason)
                    .await
                {
                    tracing::error!(mutation_id = entry.id, error = %err, "Could not dead-letter mutation");
                    break;
                }
                pass.dead_lettered += 1;
                continue;
            }

            let outcome = self.dispatch(collection, &entry.mutation).await;

            let mut queue = self.writer.lock().await;
            match outcome {
                Ok(record) => {
                    if let Err(err) = self.reconcile(&mut queue, &entry, record).await {
                        tracing::error!(
                            mutation_id = entry.id,
                            collection,
                            error = %err,
                            "Could not record synced mutation; stopping collection"
                        );
                        break;
                    }
                    pass.succeeded += 1;
                }
                Err(RemoteError::Rejected(reason)) => {
                    pass.failed += 1;
                    tracing::warn!(
                        mutation_id = entry.id,
                        collection,
                        operation = %entry.operation(),
                        error = %reason,
                        "Remote rejected queued mutation; moving to dead letters"
                    );
                    if let Err(err) = queue.dead_letter(entry.id, DeadLetterReason::Rejected, &reason).await {
                        tracing::error!(mutation_id = entry.id, error = %err, "Could not dead-letter mutation");
                        break;
                    }
                    pass.dead_lettered += 1;
                }
                Err(RemoteError::Unavailable(reason)) => {
                    pass.failed += 1;
                    let attempts = match queue.increment_attempts(entry.id, &reason).await {
                        Ok(attempts) => attempts.unwrap_or(entry.attempts),
                        Err(err) => {
                            tracing::error!(mutation_id = entry.id, error = %err, "Could not record failed attempt");
                            break;
                        }
                    };

                    tracing::warn!(
                        mutation_id = entry.id,
                        collection,
                        attempts,
                        max_attempts = self.config.max_attempts,
                        error = %reason,
                        "Queued mutation failed; halting collection"
                    );

                    if attempts >= self.config.max_attempts {
                        match queue
                            .dead_letter(entry.id, DeadLetterReason::RetriesExhausted, &reason)
                            .await
                        {
                            Ok(_) => pass.dead_lettered += 1,
                            Err(err) => {
                                tracing::error!(mutation_id = entry.id, error = %err, "Could not dead-letter mutation")
                            }
                        }
                    }
                    break;
                }
            }
        }

        pass
    }

    /// Record a confirmed mutation: drop it from the queue and fold the
    /// authoritative result into the cache.
    async fn reconcile(
        &self,
        queue: &mut MutationQueue,
        entry: &PendingMutation,
        record: Option<EntityRecord>,
    ) -> SyncResult<()> {
        queue.remove(entry.id).await?;

        let collection = entry.collection.as_str();
        let mut records = self.cache.read(collection).await;

        match (&entry.mutation, record) {
            (Mutation::Create { .. }, Some(server)) => {
                let server_id = server.id.clone();
                let placeholder = queue.resolve_placeholder(entry.id, &server_id).await?;
                let server = overlay_pending(server, queue, collection);
                let bridged = match &placeholder {
                    Some(placeholder) => cache_store::replace_id(&mut records, placeholder, server),
                    None => false,
                };
                tracing::debug!(
                    mutation_id = entry.id,
                    collection,
                    placeholder = placeholder.as_deref().unwrap_or_default(),
                    server_id = %server_id,
                    bridged,
                    "Queued create synced"
                );
            }
            (Mutation::Update { .. }, Some(server)) => {
                if records.iter().any(|r| r.id == server.id) {
                    let server = overlay_pending(server, queue, collection);
                    cache_store::replace(&mut records, server);
                }
            }
            (Mutation::Delete { target_id }, _) => cache_store::remove(&mut records, target_id),
            _ => {}
        }

        self.cache.write(collection, &records).await
    }

    async fn dispatch(&self, collection: &str, mutation: &Mutation) -> RemoteResult<Option<EntityRecord>> {
        match mutation {
            Mutation::Create { fields } => self.with_timeout(self.remote.create(collection, fields)).await.map(Some),
            Mutation::Update { target_id, patch } => self
                .with_timeout(self.remote.update(collection, target_id, patch))
                .await
                .map(Some),
            Mutation::Delete { target_id } => self
                .with_timeout(self.remote.delete(collection, target_id))
                .await
                .map(|()| None),
        }
    }

    async fn with_timeout<T>(&self, call: impl Future<Output = RemoteResult<T>>) -> RemoteResult<T> {
        match tokio::time::timeout(self.config.remote_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Unavailable(format!(
                "remote call timed out after {} ms",
                self.config.remote_timeout.as_millis()
            ))),
        }
    }

    async fn write_cache_logged(&self, collection: &str, records: &[EntityRecord]) {
        if let Err(err) = self.cache.write(collection, records).await {
            tracing::error!(
                collection,
                error = %err,
                "Cache write failed; the queue and remote store stay authoritative until the next refresh"
            );
        }
    }

    /// Queued mutations, oldest first, optionally for one collection
    pub async fn pending_mutations(&self, collection: Option<&str>) -> Vec<PendingMutation> {
        let queue = self.writer.lock().await;
        match collection {
            Some(collection) => queue.peek_all(collection),
            None => queue.all_pending().to_vec(),
        }
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.writer.lock().await.dead_letters().to_vec()
    }

    /// Give a dead letter a fresh attempt budget at its original position.
    /// Requeuing a CREATE also requeues the mutations that were parked
    /// waiting for it.
    pub async fn requeue_dead_letter(&self, mutation_id: u64) -> SyncResult<PendingMutation> {
        let requeued = self.writer.lock().await.requeue_dead_letter(mutation_id).await?;
        tracing::info!(mutation_id, collection = %requeued.collection, "Requeued dead letter");
        Ok(requeued)
    }

    /// Drop a dead letter. The cache keeps its optimistic state; a
    /// `refresh` realigns it with the remote store.
    pub async fn discard_dead_letter(&self, mutation_id: u64) -> SyncResult<DeadLetter> {
        let discarded = self.writer.lock().await.discard_dead_letter(mutation_id).await?;
        tracing::info!(mutation_id, collection = %discarded.mutation.collection, "Discarded dead letter");
        Ok(discarded)
    }

    /// Drain the queue on every offline -> online transition reported by
    /// the connectivity oracle. The task runs until aborted or until the
    /// oracle's sender side goes away.
    pub fn spawn_reconnect_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let mut rx = self.connectivity.subscribe();
        let mut was_online = *rx.borrow_and_update();

        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                if online && !was_online {
                    tracing::info!("Reconnected; draining mutation queue");
                    let summary = engine.drain_queue().await;
                    tracing::info!(
                        succeeded = summary.succeeded,
                        still_pending = summary.still_pending,
                        "Reconnect drain complete"
                    );
                }
                was_online = online;
            }
        })
    }
}

/// Re-apply the still-queued UPDATEs of the same record onto an
/// authoritative result, so the cache keeps showing local edits that have
/// not synced yet.
fn overlay_pending(mut record: EntityRecord, queue: &MutationQueue, collection: &str) -> EntityRecord {
    for pending in queue.peek_all(collection) {
        if let Mutation::Update { target_id, patch } = &pending.mutation {
            if *target_id == record.id {
                record.merge(patch);
            }
        }
    }
    record
}

/// Fetched remote rows with the collection's queued mutations replayed on
/// top, in queue order.
fn rebase(mut records: Vec<EntityRecord>, queue: &MutationQueue, collection: &str) -> Vec<EntityRecord> {
    for pending in queue.peek_all(collection) {
        match &pending.mutation {
            Mutation::Create { fields } => {
                if let Some(placeholder) = queue.placeholder_for(pending.id) {
                    cache_store::prepend(&mut records, EntityRecord::new(placeholder, fields.clone()));
                }
            }
            Mutation::Update { target_id, patch } => {
                cache_store::merge(&mut records, target_id, patch);
            }
            Mutation::Delete { target_id } => cache_store::remove(&mut records, target_id),
        }
    }
    records
}
