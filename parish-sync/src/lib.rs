//! Offline-first synchronization engine for Parish
//!
//! Provides:
//! - Local cache of entity records, readable while offline
//! - Durable mutation queue with placeholder id bridging
//! - Ordered drain on reconnect with retry ceiling and dead letters
//! - SQLite and in-memory key-value backends
//! - PostgREST remote store client
//! - Typed services for members, events and attendance

pub mod cache_store;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod mutation;
pub mod mutation_queue;
pub mod record;
pub mod remote;
pub mod rest_remote;
pub mod services;
pub mod storage;

pub use cache_store::LocalCacheStore;
pub use config::SyncConfig;
pub use connectivity::{ConnectivityMonitor, ConnectivityOracle};
pub use engine::{DrainSummary, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use mutation::{DeadLetter, DeadLetterReason, Mutation, OperationType, PendingMutation};
pub use mutation_queue::MutationQueue;
pub use record::{is_placeholder_id, placeholder_references, EntityRecord, Fields, PLACEHOLDER_PREFIX};
pub use remote::{RemoteError, RemoteResult, RemoteStore};
pub use rest_remote::{RestRemoteConfig, RestRemoteStore};
pub use services::{
    attendance::AttendanceService, events::EventService, members::MemberService, Attendance, AttendancePatch,
    AttendanceStatus, Entity, EntityService, Event, EventPatch, Member, MemberPatch, MembershipStatus, Stored,
};
pub use storage::{KeyValueStore, LocalStoreConfig, MemoryKeyValueStore, SqliteKeyValueStore};
