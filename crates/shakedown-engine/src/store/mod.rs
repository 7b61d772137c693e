//! Durable, time-ordered, capacity-bounded record stores.
//!
//! A [`BoundedLog`] is the typed front of one object store inside a
//! [`Database`]. The same abstraction backs the debug log (keyed by entry id,
//! ordered by `timestamp`) and the session archive (keyed by `sessionId`,
//! ordered by `startTime`).

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use shakedown_common::{LogEntry, SessionSnapshot, StoreError};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

pub use memory::MemoryDatabase;
pub use sqlite::SqliteDatabase;

/// Where a record type lives: database name and version, object store name,
/// and the name of the secondary index over the ordering key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreSchema {
    pub database: &'static str,
    pub version: u32,
    pub store: &'static str,
    pub index: &'static str,
}

pub const LOG_SCHEMA: StoreSchema = StoreSchema {
    database: "shakedown-debug-log",
    version: 1,
    store: "entries",
    index: "timestamp",
};

pub const SESSION_SCHEMA: StoreSchema = StoreSchema {
    database: "shakedown-sessions",
    version: 1,
    store: "sessions",
    index: "startTime",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    Ascending,
    #[default]
    Descending,
}

/// A record as the database sees it: primary key, ordering key, JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub key: String,
    pub order_key: i64,
    pub value: String,
}

/// Embedded database holding any number of object stores.
///
/// Implementations create the store and its index on first use. Every call
/// is an independent transaction.
#[async_trait]
pub trait Database: Send + Sync {
    /// Insert, replacing any record with the same key.
    async fn put(&self, schema: &StoreSchema, record: StoredRecord) -> Result<(), StoreError>;

    /// All records ordered by `order_key` (ties by key).
    async fn scan(
        &self,
        schema: &StoreSchema,
        direction: Direction,
    ) -> Result<Vec<StoredRecord>, StoreError>;

    async fn count(&self, schema: &StoreSchema) -> Result<usize, StoreError>;

    async fn clear(&self, schema: &StoreSchema) -> Result<(), StoreError>;

    /// Delete the `count - max_records` records with the smallest ordering
    /// key. Counting and deleting happen in one transaction. Returns the
    /// number of records deleted.
    async fn prune_oldest(
        &self,
        schema: &StoreSchema,
        max_records: usize,
    ) -> Result<usize, StoreError>;
}

/// A value that can live in a [`BoundedLog`].
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    const SCHEMA: StoreSchema;

    fn key(&self) -> &str;

    /// Epoch milliseconds used by the ordering index.
    fn order_key(&self) -> i64;
}

impl Record for LogEntry {
    const SCHEMA: StoreSchema = LOG_SCHEMA;

    fn key(&self) -> &str {
        &self.id
    }

    fn order_key(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

impl Record for SessionSnapshot {
    const SCHEMA: StoreSchema = SESSION_SCHEMA;

    fn key(&self) -> &str {
        &self.session_id
    }

    fn order_key(&self) -> i64 {
        self.start_time.timestamp_millis()
    }
}

/// Typed, capacity-bounded view over one object store.
pub struct BoundedLog<R> {
    db: Arc<dyn Database>,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for BoundedLog<R> {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            _record: PhantomData,
        }
    }
}

impl<R: Record> BoundedLog<R> {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            _record: PhantomData,
        }
    }

    pub fn schema(&self) -> StoreSchema {
        R::SCHEMA
    }

    /// Write `record` under its key.
    ///
    /// Transient failures are logged and the write is dropped; only
    /// [`StoreError::QuotaExceeded`] reaches the caller.
    pub async fn insert_or_replace(&self, record: &R) -> Result<(), StoreError> {
        let value = match serde_json::to_string(record) {
            Ok(v) => v,
            Err(e) => {
                warn!(store = R::SCHEMA.store, "Dropping unserializable record: {}", e);
                return Ok(());
            }
        };
        let stored = StoredRecord {
            key: record.key().to_string(),
            order_key: record.order_key(),
            value,
        };

        match self.db.put(&R::SCHEMA, stored).await {
            Ok(()) => Ok(()),
            Err(StoreError::QuotaExceeded) => Err(StoreError::QuotaExceeded),
            Err(e) => {
                warn!(store = R::SCHEMA.store, "Write dropped: {}", e);
                Ok(())
            }
        }
    }

    /// Every record in the given order. Read failures yield an empty list;
    /// rows that no longer decode are skipped.
    pub async fn list_all(&self, direction: Direction) -> Vec<R> {
        let rows = match self.db.scan(&R::SCHEMA, direction).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(store = R::SCHEMA.store, "Read failed, returning no records: {}", e);
                return Vec::new();
            }
        };

        rows.into_iter()
            .filter_map(|row| match serde_json::from_str::<R>(&row.value) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(
                        store = R::SCHEMA.store,
                        key = %row.key,
                        "Skipping corrupt record: {}", e
                    );
                    None
                }
            })
            .collect()
    }

    pub async fn newest_first(&self) -> Vec<R> {
        self.list_all(Direction::Descending).await
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        self.db.count(&R::SCHEMA).await
    }

    pub async fn clear_all(&self) -> Result<(), StoreError> {
        self.db.clear(&R::SCHEMA).await
    }

    /// Keep only the `max_records` newest records. Returns how many were
    /// deleted; transient failures count as zero.
    pub async fn enforce_capacity(&self, max_records: usize) -> Result<usize, StoreError> {
        match self.db.prune_oldest(&R::SCHEMA, max_records).await {
            Ok(deleted) => {
                if deleted > 0 {
                    debug!(store = R::SCHEMA.store, deleted, max_records, "Pruned oldest records");
                }
                Ok(deleted)
            }
            Err(StoreError::QuotaExceeded) => Err(StoreError::QuotaExceeded),
            Err(e) => {
                warn!(store = R::SCHEMA.store, "Capacity enforcement skipped: {}", e);
                Ok(0)
            }
        }
    }

    /// Newest-first JSON array of every record; an empty store gives `[]`.
    pub async fn export_json(&self) -> String {
        let records = self.newest_first().await;
        serde_json::to_string_pretty(&records).unwrap_or_else(|e| {
            warn!(store = R::SCHEMA.store, "Export serialization failed: {}", e);
            "[]".to_string()
        })
    }
}
