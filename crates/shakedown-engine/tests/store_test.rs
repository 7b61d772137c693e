use chrono::{DateTime, Duration, TimeZone, Utc};
use shakedown_common::{
    EnvironmentFacts, LogCategory, LogEntry, SessionSnapshot, Severity, StoreError,
};
use shakedown_engine::store::{BoundedLog, Database, Direction, MemoryDatabase};
use std::sync::Arc;

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn entry(i: i64) -> LogEntry {
    LogEntry::new(
        base_time() + Duration::seconds(i),
        LogCategory::App,
        Severity::Info,
        format!("entry-{}", i),
    )
}

fn setup() -> (Arc<MemoryDatabase>, BoundedLog<LogEntry>) {
    let db = Arc::new(MemoryDatabase::new());
    let log = BoundedLog::new(db.clone() as Arc<dyn Database>);
    (db, log)
}

fn messages(entries: &[LogEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.message.as_str()).collect()
}

#[tokio::test]
async fn test_enforce_capacity_keeps_newest() {
    let (_db, log) = setup();
    // Insert out of order; the index orders by timestamp, not insertion
    for i in [3, 0, 9, 5, 1, 7, 2, 8, 4, 6] {
        log.insert_or_replace(&entry(i)).await.unwrap();
    }

    let deleted = log.enforce_capacity(4).await.unwrap();

    assert_eq!(deleted, 6);
    assert_eq!(log.count().await.unwrap(), 4);
    assert_eq!(
        messages(&log.newest_first().await),
        vec!["entry-9", "entry-8", "entry-7", "entry-6"]
    );
}

#[tokio::test]
async fn test_enforce_capacity_under_limit_is_noop() {
    let (_db, log) = setup();
    for i in 0..3 {
        log.insert_or_replace(&entry(i)).await.unwrap();
    }
    assert_eq!(log.enforce_capacity(3).await.unwrap(), 0);
    assert_eq!(log.enforce_capacity(10).await.unwrap(), 0);
    assert_eq!(log.count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_enforce_capacity_zero_empties_store() {
    let (_db, log) = setup();
    for i in 0..4 {
        log.insert_or_replace(&entry(i)).await.unwrap();
    }
    assert_eq!(log.enforce_capacity(0).await.unwrap(), 4);
    assert_eq!(log.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_clear_all_is_idempotent() {
    let (_db, log) = setup();
    log.clear_all().await.unwrap();
    assert_eq!(log.count().await.unwrap(), 0);

    for i in 0..5 {
        log.insert_or_replace(&entry(i)).await.unwrap();
    }
    log.clear_all().await.unwrap();
    log.clear_all().await.unwrap();
    assert_eq!(log.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_listing_order() {
    let (_db, log) = setup();
    for i in 0..4 {
        log.insert_or_replace(&entry(i)).await.unwrap();
    }

    assert_eq!(
        messages(&log.newest_first().await),
        vec!["entry-3", "entry-2", "entry-1", "entry-0"]
    );
    assert_eq!(
        messages(&log.list_all(Direction::Ascending).await),
        vec!["entry-0", "entry-1", "entry-2", "entry-3"]
    );
}

#[tokio::test]
async fn test_export_empty_store() {
    let (_db, log) = setup();
    assert_eq!(log.export_json().await, "[]");
}

#[tokio::test]
async fn test_export_round_trip() {
    let (_db, log) = setup();
    let first = entry(0).with_payload(serde_json::json!({ "status": 503, "retry": true }));
    let second = entry(1);
    log.insert_or_replace(&first).await.unwrap();
    log.insert_or_replace(&second).await.unwrap();

    let parsed: Vec<LogEntry> = serde_json::from_str(&log.export_json().await).unwrap();
    assert_eq!(parsed, vec![second, first]);
}

#[tokio::test]
async fn test_same_key_replaces() {
    let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
    let sessions = BoundedLog::<SessionSnapshot>::new(db);
    let mut snapshot = SessionSnapshot::new(EnvironmentFacts::default(), base_time());

    sessions.insert_or_replace(&snapshot).await.unwrap();
    snapshot.end_time = Some(base_time() + Duration::seconds(5));
    sessions.insert_or_replace(&snapshot).await.unwrap();

    let stored = sessions.newest_first().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].end_time, snapshot.end_time);
}

#[tokio::test]
async fn test_stores_are_isolated() {
    let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
    let logs = BoundedLog::<LogEntry>::new(db.clone());
    let sessions = BoundedLog::<SessionSnapshot>::new(db);

    logs.insert_or_replace(&entry(0)).await.unwrap();
    sessions
        .insert_or_replace(&SessionSnapshot::new(EnvironmentFacts::default(), base_time()))
        .await
        .unwrap();
    logs.clear_all().await.unwrap();

    assert_eq!(logs.count().await.unwrap(), 0);
    assert_eq!(sessions.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_quota_exceeded_is_surfaced() {
    let (db, log) = setup();
    db.set_quota_exceeded(true);

    let err = log.insert_or_replace(&entry(0)).await.unwrap_err();
    assert!(matches!(err, StoreError::QuotaExceeded));
}

#[tokio::test]
async fn test_transient_failures_degrade() {
    let (db, log) = setup();
    log.insert_or_replace(&entry(0)).await.unwrap();
    db.set_unavailable(true);

    // Writes and capacity enforcement are dropped, reads come back empty
    log.insert_or_replace(&entry(1)).await.unwrap();
    assert_eq!(log.enforce_capacity(0).await.unwrap(), 0);
    assert!(log.newest_first().await.is_empty());
    assert_eq!(log.export_json().await, "[]");

    // Explicit count and clear propagate
    assert!(log.count().await.is_err());
    assert!(log.clear_all().await.is_err());

    db.set_unavailable(false);
    assert_eq!(log.count().await.unwrap(), 1);
}
