pub mod error;
pub mod log_entry;
pub mod session;

pub use error::{ReportError, StoreError};
pub use log_entry::{LogCategory, LogEntry, Severity};
pub use session::{
    EnvironmentFacts, InteractionEvent, InteractionKind, MemorySample, SessionSnapshot,
    SessionStats, StateChangeEvent,
};
