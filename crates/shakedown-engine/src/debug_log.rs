use crate::clock::Clock;
use crate::config::schema::DebugLogConfig;
use crate::store::{BoundedLog, Database};
use shakedown_common::{LogCategory, LogEntry, Severity, StoreError};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Persistent, capacity-bounded log of structured debug entries.
#[derive(Clone)]
pub struct DebugLog {
    store: BoundedLog<LogEntry>,
    clock: Arc<dyn Clock>,
    max_entries: usize,
}

impl DebugLog {
    pub fn new(db: Arc<dyn Database>, clock: Arc<dyn Clock>, config: &DebugLogConfig) -> Self {
        Self {
            store: BoundedLog::new(db),
            clock,
            max_entries: config.max_entries,
        }
    }

    /// Append an entry and trim the store to capacity. Returns the entry as
    /// written; only a full store is reported as an error.
    pub async fn log(
        &self,
        category: LogCategory,
        severity: Severity,
        message: impl Into<String>,
        payload: Option<serde_json::Value>,
    ) -> Result<LogEntry, StoreError> {
        let mut entry = LogEntry::new(self.clock.now(), category, severity, message);
        entry.payload = payload;

        match severity {
            Severity::Info | Severity::Success => {
                info!(category = %category, "{}", entry.message)
            }
            Severity::Warning => warn!(category = %category, "{}", entry.message),
            Severity::Error => error!(category = %category, "{}", entry.message),
        }

        self.store.insert_or_replace(&entry).await?;
        self.store.enforce_capacity(self.max_entries).await?;
        Ok(entry)
    }

    pub async fn info(
        &self,
        category: LogCategory,
        message: impl Into<String>,
    ) -> Result<LogEntry, StoreError> {
        self.log(category, Severity::Info, message, None).await
    }

    pub async fn success(
        &self,
        category: LogCategory,
        message: impl Into<String>,
    ) -> Result<LogEntry, StoreError> {
        self.log(category, Severity::Success, message, None).await
    }

    pub async fn warning(
        &self,
        category: LogCategory,
        message: impl Into<String>,
    ) -> Result<LogEntry, StoreError> {
        self.log(category, Severity::Warning, message, None).await
    }

    pub async fn error(
        &self,
        category: LogCategory,
        message: impl Into<String>,
    ) -> Result<LogEntry, StoreError> {
        self.log(category, Severity::Error, message, None).await
    }

    /// Newest first.
    pub async fn entries(&self) -> Vec<LogEntry> {
        self.store.newest_first().await
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        self.store.count().await
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        debug!("Clearing debug log");
        self.store.clear_all().await
    }

    pub async fn export_json(&self) -> String {
        self.store.export_json().await
    }
}
