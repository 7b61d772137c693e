use chrono::{TimeZone, Utc};
use serde_json::json;
use shakedown_common::{LogCategory, LogEntry, Severity, StoreError};
use shakedown_engine::DebugLog;
use shakedown_engine::clock::{Clock, ManualClock};
use shakedown_engine::config::schema::DebugLogConfig;
use shakedown_engine::store::MemoryDatabase;
use std::sync::Arc;

fn setup(max_entries: usize) -> (Arc<MemoryDatabase>, Arc<ManualClock>, DebugLog) {
    let db = Arc::new(MemoryDatabase::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 9, 12, 14, 0, 0).unwrap(),
    ));
    let log = DebugLog::new(db.clone(), clock.clone(), &DebugLogConfig { max_entries });
    (db, clock, log)
}

#[tokio::test]
async fn test_log_trims_to_capacity() {
    let (_db, clock, log) = setup(3);
    for i in 0..5 {
        log.info(LogCategory::Sync, format!("sync step {}", i))
            .await
            .unwrap();
        clock.advance_ms(100);
    }

    assert_eq!(log.count().await.unwrap(), 3);
    let messages: Vec<String> = log.entries().await.into_iter().map(|e| e.message).collect();
    assert_eq!(messages, vec!["sync step 4", "sync step 3", "sync step 2"]);
}

#[tokio::test]
async fn test_entry_fields() {
    let (_db, clock, log) = setup(10);
    let entry = log
        .log(
            LogCategory::Network,
            Severity::Error,
            "GET /api/items failed",
            Some(json!({ "status": 502 })),
        )
        .await
        .unwrap();

    assert_eq!(entry.timestamp, clock.now());
    assert_eq!(entry.category, LogCategory::Network);
    assert_eq!(entry.severity, Severity::Error);
    assert_eq!(entry.payload, Some(json!({ "status": 502 })));
    assert_eq!(log.entries().await, vec![entry]);
}

#[tokio::test]
async fn test_severity_helpers() {
    let (_db, clock, log) = setup(10);
    log.info(LogCategory::App, "a").await.unwrap();
    clock.advance_ms(1);
    log.success(LogCategory::Storage, "b").await.unwrap();
    clock.advance_ms(1);
    log.warning(LogCategory::Worker, "c").await.unwrap();
    clock.advance_ms(1);
    log.error(LogCategory::Ui, "d").await.unwrap();

    let severities: Vec<Severity> = log.entries().await.into_iter().map(|e| e.severity).collect();
    assert_eq!(
        severities,
        vec![
            Severity::Error,
            Severity::Warning,
            Severity::Success,
            Severity::Info
        ]
    );
}

#[tokio::test]
async fn test_export_and_clear() {
    let (_db, _clock, log) = setup(10);
    assert_eq!(log.export_json().await, "[]");

    log.info(LogCategory::App, "hello").await.unwrap();
    let exported: Vec<LogEntry> = serde_json::from_str(&log.export_json().await).unwrap();
    assert_eq!(exported.len(), 1);
    assert_eq!(exported[0].message, "hello");

    log.clear().await.unwrap();
    assert_eq!(log.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_quota_reaches_caller() {
    let (db, _clock, log) = setup(10);
    db.set_quota_exceeded(true);

    let result = log.warning(LogCategory::Storage, "disk almost full").await;
    assert!(matches!(result, Err(StoreError::QuotaExceeded)));
}

#[tokio::test]
async fn test_unavailable_store_never_fails_logging() {
    let (db, _clock, log) = setup(10);
    db.set_unavailable(true);

    assert!(log.info(LogCategory::App, "dropped").await.is_ok());
    assert!(log.entries().await.is_empty());
}
