//! Persistent queue of mutations waiting for the remote store
//!
//! The whole queue (entries, sequence counter, placeholder map and dead
//! letters) is one JSON document under a single key, so every change is an
//! atomic replace and sequence ids survive restarts without reuse.

use crate::error::{SyncError, SyncResult};
use crate::mutation::{DeadLetter, DeadLetterReason, Mutation, PendingMutation};
use crate::record::PLACEHOLDER_PREFIX;
use crate::storage::KeyValueStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

const QUEUE_KEY: &str = "mutation_queue";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueueState {
    next_seq: u64,
    pending: Vec<PendingMutation>,
    /// Sequence id of a queued CREATE -> placeholder id handed out for it
    placeholders: BTreeMap<u64, String>,
    dead_letters: Vec<DeadLetter>,
}

impl Default for QueueState {
    fn default() -> Self {
        Self {
            next_seq: 1,
            pending: Vec::new(),
            placeholders: BTreeMap::new(),
            dead_letters: Vec::new(),
        }
    }
}

/// Ordered, durable list of not-yet-synced mutations
pub struct MutationQueue {
    kv: Arc<dyn KeyValueStore>,
    state: QueueState,
}

impl MutationQueue {
    /// Load the queue from storage. Corrupt state is logged and replaced by
    /// an empty queue.
    pub async fn open(kv: Arc<dyn KeyValueStore>) -> Self {
        let state = match kv.get(QUEUE_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<QueueState>(&raw) {
                Ok(state) => state,
                Err(err) => {
                    let corruption = SyncError::CacheCorruption {
                        key: QUEUE_KEY.to_string(),
                        reason: err.to_string(),
                    };
                    tracing::error!(error = %corruption, "Discarding corrupt mutation queue");
                    QueueState::default()
                }
            },
            Ok(None) => QueueState::default(),
            Err(err) => {
                tracing::error!(error = %err, "Mutation queue unreadable; starting empty");
                QueueState::default()
            }
        };

        tracing::debug!(
            pending = state.pending.len(),
            dead_letters = state.dead_letters.len(),
            "Loaded mutation queue"
        );

        Self { kv, state }
    }

    /// Append a mutation at the tail and assign its sequence id.
    pub async fn enqueue(&mut self, collection: &str, mutation: Mutation) -> SyncResult<PendingMutation> {
        let collection = collection.to_string();
        self.update(move |state| {
            let seq = state.next_seq;
            state.next_seq += 1;

            if matches!(mutation, Mutation::Create { .. }) {
                let token = format!("{PLACEHOLDER_PREFIX}{}-{seq}", Utc::now().timestamp_millis());
                state.placeholders.insert(seq, token);
            }

            let entry = PendingMutation {
                id: seq,
                collection,
                mutation,
                enqueued_at: Utc::now(),
                attempts: 0,
                last_error: None,
            };
            state.pending.push(entry.clone());
            entry
        })
        .await
    }

    /// Placeholder id issued for a queued CREATE
    pub fn placeholder_for(&self, mutation_id: u64) -> Option<&str> {
        self.state.placeholders.get(&mutation_id).map(String::as_str)
    }

    /// Whether `id` is a placeholder still waiting for its CREATE to sync
    pub fn is_unresolved_placeholder(&self, id: &str) -> bool {
        self.state.placeholders.values().any(|p| p == id)
    }

    /// Queued mutations of one collection, oldest first
    pub fn peek_all(&self, collection: &str) -> Vec<PendingMutation> {
        self.state
            .pending
            .iter()
            .filter(|m| m.collection == collection)
            .cloned()
            .collect()
    }

    /// Oldest queued mutation of one collection
    pub fn head(&self, collection: &str) -> Option<PendingMutation> {
        self.state.pending.iter().find(|m| m.collection == collection).cloned()
    }

    pub fn all_pending(&self) -> &[PendingMutation] {
        &self.state.pending
    }

    pub fn has_pending(&self, collection: &str) -> bool {
        self.state.pending.iter().any(|m| m.collection == collection)
    }

    pub fn pending_count(&self) -> usize {
        self.state.pending.len()
    }

    /// Collections with queued work, in order of their oldest entry
    pub fn collections_with_pending(&self) -> Vec<String> {
        let mut collections: Vec<String> = Vec::new();
        for m in &self.state.pending {
            if !collections.contains(&m.collection) {
                collections.push(m.collection.clone());
            }
        }
        collections
    }

    /// Remove one entry; absent ids are a no-op.
    pub async fn remove(&mut self, mutation_id: u64) -> SyncResult<Option<PendingMutation>> {
        if !self.state.pending.iter().any(|m| m.id == mutation_id) {
            return Ok(None);
        }
        self.update(|state| {
            let index = state.pending.iter().position(|m| m.id == mutation_id)?;
            Some(state.pending.remove(index))
        })
        .await
    }

    /// Record a failed attempt; returns the new attempt count.
    pub async fn increment_attempts(&mut self, mutation_id: u64, error: &str) -> SyncResult<Option<u32>> {
        let error = error.to_string();
        self.update(move |state| {
            let entry = state.pending.iter_mut().find(|m| m.id == mutation_id)?;
            entry.attempts = entry.attempts.saturating_add(1);
            entry.last_error = Some(error);
            Some(entry.attempts)
        })
        .await
    }

    /// Move a queued mutation to the dead-letter list.
    pub async fn dead_letter(
        &mut self,
        mutation_id: u64,
        reason: DeadLetterReason,
        error: &str,
    ) -> SyncResult<Option<DeadLetter>> {
        let error = error.to_string();
        self.update(move |state| {
            let index = state.pending.iter().position(|m| m.id == mutation_id)?;
            let mut mutation = state.pending.remove(index);
            mutation.last_error = Some(error.clone());
            let letter = DeadLetter {
                mutation,
                reason,
                error,
                dead_lettered_at: Utc::now(),
            };
            state.dead_letters.push(letter.clone());
            Some(letter)
        })
        .await
    }

    /// Bridge a synced CREATE to its server id.
    ///
    /// Drops the placeholder mapping of `mutation_id` and rewrites every
    /// queued or dead-lettered mutation targeting the placeholder. Returns
    /// the placeholder that was replaced.
    pub async fn resolve_placeholder(&mut self, mutation_id: u64, server_id: &str) -> SyncResult<Option<String>> {
        if !self.state.placeholders.contains_key(&mutation_id) {
            return Ok(None);
        }
        let server_id = server_id.to_string();
        self.update(move |state| {
            let placeholder = state.placeholders.remove(&mutation_id)?;
            let mut rewritten = 0usize;
            for entry in state.pending.iter_mut() {
                if entry.mutation.retarget(&placeholder, &server_id) {
                    rewritten += 1;
                }
            }
            for letter in state.dead_letters.iter_mut() {
                if letter.mutation.mutation.retarget(&placeholder, &server_id) {
                    rewritten += 1;
                }
            }
            tracing::debug!(
                mutation_id,
                placeholder = %placeholder,
                server_id = %server_id,
                rewritten,
                "Resolved placeholder id"
            );
            Some(placeholder)
        })
        .await
    }

    pub fn dead_letters(&self) -> &[DeadLetter] {
        &self.state.dead_letters
    }

    /// Put a dead letter back in the queue at its original sequence
    /// position with a fresh attempt budget.
    ///
    /// Requeuing a CREATE also requeues every mutation parked as
    /// [`DeadLetterReason::AwaitingCreate`] on its placeholder.
    pub async fn requeue_dead_letter(&mut self, mutation_id: u64) -> SyncResult<PendingMutation> {
        if !self.state.dead_letters.iter().any(|l| l.mutation.id == mutation_id) {
            return Err(SyncError::NotFound(format!("dead letter {mutation_id}")));
        }
        let requeued = self
            .update(|state| {
                let index = state.dead_letters.iter().position(|l| l.mutation.id == mutation_id)?;
                let mutation = state.dead_letters.remove(index).mutation;

                if let Some(placeholder) = state.placeholders.get(&mutation_id).cloned() {
                    let (waiting, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut state.dead_letters)
                        .into_iter()
                        .partition(|l| {
                            l.reason == DeadLetterReason::AwaitingCreate
                                && l.mutation.target_id() == Some(placeholder.as_str())
                        });
                    state.dead_letters = rest;
                    for letter in waiting {
                        reinsert(&mut state.pending, letter.mutation);
                    }
                }

                Some(reinsert(&mut state.pending, mutation))
            })
            .await?;
        requeued.ok_or_else(|| SyncError::NotFound(format!("dead letter {mutation_id}")))
    }

    /// Drop a dead letter for good.
    pub async fn discard_dead_letter(&mut self, mutation_id: u64) -> SyncResult<DeadLetter> {
        if !self.state.dead_letters.iter().any(|l| l.mutation.id == mutation_id) {
            return Err(SyncError::NotFound(format!("dead letter {mutation_id}")));
        }
        let discarded = self
            .update(|state| {
                let index = state.dead_letters.iter().position(|l| l.mutation.id == mutation_id)?;
                state.placeholders.remove(&mutation_id);
                Some(state.dead_letters.remove(index))
            })
            .await?;
        discarded.ok_or_else(|| SyncError::NotFound(format!("dead letter {mutation_id}")))
    }

    /// Apply a change to a copy of the state, persist it, then commit it.
    /// A failed write leaves the in-memory queue untouched.
    async fn update<T>(&mut self, change: impl FnOnce(&mut QueueState) -> T) -> SyncResult<T> {
        let mut next = self.state.clone();
        let out = change(&mut next);
        let raw = serde_json::to_string(&next)?;
        self.kv.put(QUEUE_KEY, &raw).await?;
        self.state = next;
        Ok(out)
    }
}

/// Insert at the sequence position with a fresh attempt budget.
fn reinsert(pending: &mut Vec<PendingMutation>, mut mutation: PendingMutation) -> PendingMutation {
    mutation.attempts = 0;
    mutation.last_error = None;
    let position = pending.partition_point(|m| m.id < mutation.id);
    pending.insert(position, mutation.clone());
    mutation
}
