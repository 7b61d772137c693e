use thiserror::Error;

/// Failures raised by the durable record stores.
///
/// Everything except [`StoreError::QuotaExceeded`] is treated as transient by
/// the write paths: it is logged and the write is dropped.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to open database '{database}': {reason}")]
    Open { database: String, reason: String },

    #[error("Transaction failed on store '{store}': {reason}")]
    Transaction { store: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage quota exceeded, old data must be cleared")]
    QuotaExceeded,

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, StoreError::QuotaExceeded)
    }

    pub fn transaction(store: &str, reason: impl ToString) -> Self {
        StoreError::Transaction {
            store: store.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Programming errors in bug report submission. These are surfaced to the
/// host immediately instead of degrading.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReportError {
    #[error("No issue repository configured for bug reports")]
    NotConfigured,

    #[error("Invalid repository '{0}', expected 'owner/repo'")]
    InvalidRepository(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_is_distinguished() {
        assert!(StoreError::QuotaExceeded.is_quota_exceeded());
        assert!(!StoreError::Unavailable("private mode".into()).is_quota_exceeded());
        assert!(!StoreError::transaction("entries", "aborted").is_quota_exceeded());
    }

    #[test]
    fn test_error_messages() {
        let err = StoreError::transaction("sessions", "disk I/O error");
        assert_eq!(
            err.to_string(),
            "Transaction failed on store 'sessions': disk I/O error"
        );
        assert_eq!(
            ReportError::InvalidRepository("nope".into()).to_string(),
            "Invalid repository 'nope', expected 'owner/repo'"
        );
    }
}
