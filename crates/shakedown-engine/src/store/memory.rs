use super::{Database, Direction, StoreSchema, StoredRecord};
use async_trait::async_trait;
use shakedown_common::StoreError;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

type StoreKey = (&'static str, &'static str);

/// In-process [`Database`] with switches for simulating storage failures.
#[derive(Default)]
pub struct MemoryDatabase {
    stores: Mutex<HashMap<StoreKey, HashMap<String, (i64, String)>>>,
    fail_all: AtomicBool,
    quota_exceeded: AtomicBool,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail as if the database could not be opened.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.fail_all.store(unavailable, Ordering::SeqCst);
    }

    /// Make writes fail with [`StoreError::QuotaExceeded`].
    pub fn set_quota_exceeded(&self, exceeded: bool) {
        self.quota_exceeded.store(exceeded, Ordering::SeqCst);
    }

    fn check_open(&self, schema: &StoreSchema) -> Result<(), StoreError> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(StoreError::Open {
                database: schema.database.to_string(),
                reason: "simulated failure".to_string(),
            });
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<StoreKey, HashMap<String, (i64, String)>>> {
        self.stores.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn key_of(schema: &StoreSchema) -> StoreKey {
    (schema.database, schema.store)
}

fn sorted(rows: &HashMap<String, (i64, String)>, direction: Direction) -> Vec<StoredRecord> {
    let mut out: Vec<StoredRecord> = rows
        .iter()
        .map(|(key, (order_key, value))| StoredRecord {
            key: key.clone(),
            order_key: *order_key,
            value: value.clone(),
        })
        .collect();
    out.sort_by(|a, b| a.order_key.cmp(&b.order_key).then_with(|| a.key.cmp(&b.key)));
    if direction == Direction::Descending {
        out.reverse();
    }
    out
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn put(&self, schema: &StoreSchema, record: StoredRecord) -> Result<(), StoreError> {
        self.check_open(schema)?;
        if self.quota_exceeded.load(Ordering::SeqCst) {
            return Err(StoreError::QuotaExceeded);
        }
        self.lock()
            .entry(key_of(schema))
            .or_default()
            .insert(record.key, (record.order_key, record.value));
        Ok(())
    }

    async fn scan(
        &self,
        schema: &StoreSchema,
        direction: Direction,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        self.check_open(schema)?;
        Ok(self
            .lock()
            .get(&key_of(schema))
            .map(|rows| sorted(rows, direction))
            .unwrap_or_default())
    }

    async fn count(&self, schema: &StoreSchema) -> Result<usize, StoreError> {
        self.check_open(schema)?;
        Ok(self.lock().get(&key_of(schema)).map_or(0, |rows| rows.len()))
    }

    async fn clear(&self, schema: &StoreSchema) -> Result<(), StoreError> {
        self.check_open(schema)?;
        if let Some(rows) = self.lock().get_mut(&key_of(schema)) {
            rows.clear();
        }
        Ok(())
    }

    async fn prune_oldest(
        &self,
        schema: &StoreSchema,
        max_records: usize,
    ) -> Result<usize, StoreError> {
        self.check_open(schema)?;
        // Single lock for count + delete.
        let mut stores = self.lock();
        let Some(rows) = stores.get_mut(&key_of(schema)) else {
            return Ok(0);
        };
        if rows.len() <= max_records {
            return Ok(0);
        }
        let excess = rows.len() - max_records;
        let doomed: Vec<String> = sorted(rows, Direction::Ascending)
            .into_iter()
            .take(excess)
            .map(|r| r.key)
            .collect();
        for key in &doomed {
            rows.remove(key);
        }
        Ok(doomed.len())
    }
}
