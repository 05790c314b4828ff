//! Persistence gateway for Playmap: narrow per-entity repository traits, an
//! in-memory implementation for tests and local runs, a Postgres
//! implementation, and the shared bounded-retry HTTP fetcher.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use playmap_core::{
    CollectionLog, Mention, NaturalKey, Place, PlaceQuery, VerificationCheck,
};

pub mod fetch;
pub mod memory;
pub mod pg;

pub use fetch::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchError, HttpClientConfig,
    HttpFetcher, RetryDisposition,
};
pub use memory::MemoryStore;
pub use pg::PgStore;

pub const CRATE_NAME: &str = "playmap-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result of an idempotent insert keyed on `(source, source_id)`.
///
/// Duplicate keys are an expected outcome of re-running a collector, not an
/// error; the coordinator counts them and moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    DuplicateKey,
}

#[async_trait]
pub trait PlaceStore: Send + Sync {
    /// Insert a new record, deduplicating on the natural key at the
    /// constraint level rather than check-then-insert.
    async fn insert(&self, place: Place) -> Result<InsertOutcome, StoreError>;
    async fn find_by_natural_key(&self, key: &NaturalKey) -> Result<Option<Place>, StoreError>;
    async fn get(&self, id: Uuid) -> Result<Option<Place>, StoreError>;
    /// Filtered, sorted, keyset-bounded scan. Returns at most `query.limit`
    /// rows in the composite order of `query.sort`.
    async fn list(&self, query: &PlaceQuery) -> Result<Vec<Place>, StoreError>;
    async fn all(&self) -> Result<Vec<Place>, StoreError>;
    async fn update_score(&self, id: Uuid, score: f64) -> Result<(), StoreError>;
    async fn set_display_eligible(&self, id: Uuid, eligible: bool) -> Result<(), StoreError>;
    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), StoreError>;
}

#[async_trait]
pub trait MentionStore: Send + Sync {
    async fn append(&self, mention: Mention) -> Result<(), StoreError>;
    async fn for_place(&self, place_id: Uuid) -> Result<Vec<Mention>, StoreError>;
    async fn all(&self) -> Result<Vec<Mention>, StoreError>;
}

#[async_trait]
pub trait CollectionLogStore: Send + Sync {
    async fn append(&self, log: CollectionLog) -> Result<(), StoreError>;
    async fn recent(&self, limit: usize) -> Result<Vec<CollectionLog>, StoreError>;
}

#[async_trait]
pub trait VerificationStore: Send + Sync {
    async fn append(&self, check: VerificationCheck) -> Result<(), StoreError>;
    async fn for_place(&self, place_id: Uuid) -> Result<Vec<VerificationCheck>, StoreError>;
}

/// Best-effort search query log. Writes ride a spawned task on the read
/// path, so failures here must stay invisible to callers.
#[async_trait]
pub trait SearchLogStore: Send + Sync {
    async fn append(&self, entry: SearchLog) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchLog {
    pub id: Uuid,
    pub query: String,
    pub logged_at: DateTime<Utc>,
}

impl SearchLog {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.into(),
            logged_at: Utc::now(),
        }
    }
}

/// Bundle of repositories handed to the engines. Everything downstream is
/// storage-agnostic: swap `memory()` for `postgres(...)` without touching
/// coordinator, scoring or pagination code.
#[derive(Clone)]
pub struct Stores {
    pub places: Arc<dyn PlaceStore>,
    pub mentions: Arc<dyn MentionStore>,
    pub collection_logs: Arc<dyn CollectionLogStore>,
    pub verifications: Arc<dyn VerificationStore>,
    pub search_logs: Arc<dyn SearchLogStore>,
}

impl Stores {
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            places: store.clone(),
            mentions: store.clone(),
            collection_logs: store.clone(),
            verifications: store.clone(),
            search_logs: store,
        }
    }

    pub fn postgres(pool: sqlx::PgPool) -> Self {
        let store = Arc::new(PgStore::new(pool));
        Self {
            places: store.clone(),
            mentions: store.clone(),
            collection_logs: store.clone(),
            verifications: store.clone(),
            search_logs: store,
        }
    }
}
