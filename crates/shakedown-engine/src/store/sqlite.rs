use super::{Database, Direction, StoreSchema, StoredRecord};
use async_trait::async_trait;
use rusqlite::{Connection, ErrorCode, TransactionBehavior, params};
use shakedown_common::StoreError;
use std::path::{Path, PathBuf};

/// SQLite-backed [`Database`]: one file per logical database under `root`.
///
/// A connection is opened for each operation and dropped when it finishes.
/// Tables and indexes are created lazily, so any operation is safe as the
/// first one against a fresh directory.
#[derive(Debug, Clone)]
pub struct SqliteDatabase {
    root: PathBuf,
}

impl SqliteDatabase {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, schema: &StoreSchema) -> PathBuf {
        self.root.join(format!("{}.sqlite3", schema.database))
    }

    async fn run<T, F>(&self, schema: &StoreSchema, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let path = self.path_for(schema);
        let schema = *schema;
        tokio::task::spawn_blocking(move || {
            let mut conn = open(&path, &schema)?;
            op(&mut conn).map_err(|e| map_sqlite_error(&schema, e))
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("storage task failed: {}", e)))?
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn open(path: &Path, schema: &StoreSchema) -> Result<Connection, StoreError> {
    let open_err = |reason: String| StoreError::Open {
        database: schema.database.to_string(),
        reason,
    };

    if !is_identifier(schema.store) || !is_identifier(schema.index) {
        return Err(open_err(format!(
            "invalid store or index name: {}/{}",
            schema.store, schema.index
        )));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| open_err(e.to_string()))?;
    }

    let conn = Connection::open(path).map_err(|e| open_err(e.to_string()))?;
    ensure_schema(&conn, schema).map_err(|e| map_sqlite_error(schema, e))?;
    Ok(conn)
}

fn ensure_schema(conn: &Connection, schema: &StoreSchema) -> Result<(), rusqlite::Error> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS \"{store}\" (
            key TEXT PRIMARY KEY NOT NULL,
            order_key INTEGER NOT NULL,
            value TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS \"idx_{store}_{index}\" ON \"{store}\" (order_key, key);",
        store = schema.store,
        index = schema.index,
    ))?;

    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version < schema.version {
        conn.pragma_update(None, "user_version", schema.version)?;
    }
    Ok(())
}

fn map_sqlite_error(schema: &StoreSchema, err: rusqlite::Error) -> StoreError {
    if err.sqlite_error_code() == Some(ErrorCode::DiskFull) {
        return StoreError::QuotaExceeded;
    }
    StoreError::transaction(schema.store, err)
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn put(&self, schema: &StoreSchema, record: StoredRecord) -> Result<(), StoreError> {
        let store = schema.store;
        self.run(schema, move |conn| {
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO \"{}\" (key, order_key, value) VALUES (?1, ?2, ?3)",
                    store
                ),
                params![record.key, record.order_key, record.value],
            )?;
            Ok(())
        })
        .await
    }

    async fn scan(
        &self,
        schema: &StoreSchema,
        direction: Direction,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let store = schema.store;
        let dir = match direction {
            Direction::Ascending => "ASC",
            Direction::Descending => "DESC",
        };
        self.run(schema, move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT key, order_key, value FROM \"{}\" ORDER BY order_key {dir}, key {dir}",
                store
            ))?;
            let rows = stmt.query_map([], |row| {
                Ok(StoredRecord {
                    key: row.get(0)?,
                    order_key: row.get(1)?,
                    value: row.get(2)?,
                })
            })?;
            rows.collect()
        })
        .await
    }

    async fn count(&self, schema: &StoreSchema) -> Result<usize, StoreError> {
        let store = schema.store;
        self.run(schema, move |conn| {
            let n: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", store), [], |row| {
                    row.get(0)
                })?;
            Ok(n.max(0) as usize)
        })
        .await
    }

    async fn clear(&self, schema: &StoreSchema) -> Result<(), StoreError> {
        let store = schema.store;
        self.run(schema, move |conn| {
            conn.execute(&format!("DELETE FROM \"{}\"", store), [])?;
            Ok(())
        })
        .await
    }

    async fn prune_oldest(
        &self,
        schema: &StoreSchema,
        max_records: usize,
    ) -> Result<usize, StoreError> {
        let store = schema.store;
        self.run(schema, move |conn| {
            // IMMEDIATE takes the write lock before counting.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let count: i64 =
                tx.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", store), [], |row| {
                    row.get(0)
                })?;
            let max_records = i64::try_from(max_records).unwrap_or(i64::MAX);
            let excess = count - max_records;
            if excess <= 0 {
                return Ok(0);
            }
            let deleted = tx.execute(
                &format!(
                    "DELETE FROM \"{store}\" WHERE key IN (
                        SELECT key FROM \"{store}\" ORDER BY order_key ASC, key ASC LIMIT ?1
                    )"
                ),
                params![excess],
            )?;
            tx.commit()?;
            Ok(deleted)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_check() {
        assert!(is_identifier("startTime"));
        assert!(is_identifier("entries_v2"));
        assert!(!is_identifier("drop table"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn test_path_per_database() {
        let db = SqliteDatabase::new("/tmp/shakedown");
        assert_eq!(
            db.path_for(&crate::store::SESSION_SCHEMA),
            PathBuf::from("/tmp/shakedown/shakedown-sessions.sqlite3")
        );
    }
}
