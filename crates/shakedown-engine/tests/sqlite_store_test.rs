use chrono::{DateTime, Duration, TimeZone, Utc};
use shakedown_common::{EnvironmentFacts, LogCategory, LogEntry, SessionSnapshot, Severity};
use shakedown_engine::store::{BoundedLog, Database, LOG_SCHEMA, SESSION_SCHEMA, SqliteDatabase};
use std::sync::Arc;
use tempfile::TempDir;

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn entry(i: i64) -> LogEntry {
    LogEntry::new(
        base_time() + Duration::seconds(i),
        LogCategory::Network,
        Severity::Warning,
        format!("entry-{}", i),
    )
}

fn open(dir: &TempDir) -> BoundedLog<LogEntry> {
    let db: Arc<dyn Database> = Arc::new(SqliteDatabase::new(dir.path()));
    BoundedLog::new(db)
}

#[tokio::test]
async fn test_first_operation_creates_schema() {
    let dir = TempDir::new().unwrap();
    let log = open(&dir);

    assert_eq!(log.count().await.unwrap(), 0);
    assert!(log.newest_first().await.is_empty());
    assert_eq!(log.export_json().await, "[]");
    assert!(dir.path().join("shakedown-debug-log.sqlite3").exists());
}

#[tokio::test]
async fn test_enforce_capacity_keeps_newest() {
    let dir = TempDir::new().unwrap();
    let log = open(&dir);
    for i in [4, 1, 6, 0, 3, 5, 2] {
        log.insert_or_replace(&entry(i)).await.unwrap();
    }

    assert_eq!(log.enforce_capacity(3).await.unwrap(), 4);
    assert_eq!(log.count().await.unwrap(), 3);

    let kept: Vec<String> = log
        .newest_first()
        .await
        .into_iter()
        .map(|e| e.message)
        .collect();
    assert_eq!(kept, vec!["entry-6", "entry-5", "entry-4"]);
}

#[tokio::test]
async fn test_enforce_capacity_with_huge_cap_deletes_nothing() {
    let dir = TempDir::new().unwrap();
    let log = open(&dir);
    for i in 0..5 {
        log.insert_or_replace(&entry(i)).await.unwrap();
    }

    assert_eq!(log.enforce_capacity(usize::MAX).await.unwrap(), 0);
    assert_eq!(log.count().await.unwrap(), 5);
}

#[tokio::test]
async fn test_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let first = entry(1).with_payload(serde_json::json!({ "url": "/api/items" }));
    open(&dir).insert_or_replace(&first).await.unwrap();

    let reopened = open(&dir);
    assert_eq!(reopened.newest_first().await, vec![first]);

    reopened.clear_all().await.unwrap();
    reopened.clear_all().await.unwrap();
    assert_eq!(reopened.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_sessions_use_their_own_database() {
    let dir = TempDir::new().unwrap();
    let sqlite = SqliteDatabase::new(dir.path());
    let db: Arc<dyn Database> = Arc::new(sqlite.clone());
    let sessions = BoundedLog::<SessionSnapshot>::new(db);

    let mut snapshot = SessionSnapshot::new(EnvironmentFacts::default(), base_time());
    sessions.insert_or_replace(&snapshot).await.unwrap();
    snapshot.end_time = Some(base_time() + Duration::seconds(30));
    sessions.insert_or_replace(&snapshot).await.unwrap();

    assert_eq!(sessions.count().await.unwrap(), 1);
    assert_eq!(sessions.newest_first().await[0], snapshot);
    assert!(sqlite.path_for(&SESSION_SCHEMA).exists());
    assert_ne!(sqlite.path_for(&SESSION_SCHEMA), sqlite.path_for(&LOG_SCHEMA));
}

#[tokio::test]
async fn test_unwritable_root_degrades() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();
    let db: Arc<dyn Database> = Arc::new(SqliteDatabase::new(blocker.join("nested")));
    let log = BoundedLog::<LogEntry>::new(db);

    log.insert_or_replace(&entry(0)).await.unwrap();
    assert!(log.newest_first().await.is_empty());
    assert!(log.count().await.is_err());
}
