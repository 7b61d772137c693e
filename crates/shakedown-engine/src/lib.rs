pub mod clock;
pub mod config;
pub mod debug_log;
pub mod listeners;
pub mod platform;
pub mod recorder;
pub mod report;
pub mod shake;
pub mod store;
pub mod updates;

pub use shakedown_common::error;
pub use shakedown_common::log_entry;
pub use shakedown_common::session;

pub use debug_log::DebugLog;
pub use recorder::{RecorderDeps, RecorderPhase, SessionRecorder};
pub use report::{BugReporter, build_issue_url, collect_metadata};
pub use shake::{ShakeDetector, ShakeEvent, ShakeState};
pub use updates::{UpdateCheckState, UpdateChecker};
