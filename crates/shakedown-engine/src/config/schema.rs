use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShakedownConfig {
    #[serde(default)]
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub shake: ShakeConfig,
    #[serde(default)]
    pub updates: UpdateConfig,
    #[serde(default)]
    pub debug_log: DebugLogConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_memory_sample_interval_ms")]
    pub memory_sample_interval_ms: u64,
    #[serde(default = "default_max_interactions")]
    pub max_interactions: usize,
    #[serde(default = "default_max_state_changes")]
    pub max_state_changes: usize,
    #[serde(default = "default_max_memory_samples")]
    pub max_memory_samples: usize,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_memory_warning_percent")]
    pub memory_warning_percent: f64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
            memory_sample_interval_ms: default_memory_sample_interval_ms(),
            max_interactions: default_max_interactions(),
            max_state_changes: default_max_state_changes(),
            max_memory_samples: default_max_memory_samples(),
            max_sessions: default_max_sessions(),
            memory_warning_percent: default_memory_warning_percent(),
        }
    }
}

fn default_flush_interval_ms() -> u64 {
    5000
}

fn default_memory_sample_interval_ms() -> u64 {
    2000
}

fn default_max_interactions() -> usize {
    100
}

fn default_max_state_changes() -> usize {
    100
}

fn default_max_memory_samples() -> usize {
    60
}

fn default_max_sessions() -> usize {
    10
}

fn default_memory_warning_percent() -> f64 {
    90.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShakeConfig {
    #[serde(default = "default_shake_threshold")]
    pub threshold: f64,
    #[serde(default = "default_shake_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_shake_enabled")]
    pub enabled: bool,
}

impl Default for ShakeConfig {
    fn default() -> Self {
        Self {
            threshold: default_shake_threshold(),
            cooldown_ms: default_shake_cooldown_ms(),
            enabled: default_shake_enabled(),
        }
    }
}

fn default_shake_threshold() -> f64 {
    25.0
}

fn default_shake_cooldown_ms() -> u64 {
    2000
}

fn default_shake_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Zero or negative disables periodic checks.
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: i64,
    #[serde(default = "default_check_on_start")]
    pub check_on_start: bool,
    #[serde(default)]
    pub manifest_url: Option<String>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: default_check_interval_ms(),
            check_on_start: default_check_on_start(),
            manifest_url: None,
        }
    }
}

fn default_check_interval_ms() -> i64 {
    60 * 60 * 1000
}

fn default_check_on_start() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugLogConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for DebugLogConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

fn default_max_entries() -> usize {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// `owner/repo` of the issue tracker; reports cannot be prepared without it.
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default = "default_labels")]
    pub labels: Vec<String>,
    #[serde(default = "default_max_url_length")]
    pub max_url_length: usize,
    #[serde(default = "default_include_metadata")]
    pub include_metadata: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            repository: None,
            labels: default_labels(),
            max_url_length: default_max_url_length(),
            include_metadata: default_include_metadata(),
        }
    }
}

fn default_labels() -> Vec<String> {
    vec!["bug".to_string()]
}

fn default_max_url_length() -> usize {
    8000
}

fn default_include_metadata() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Configured directory, else the platform data dir, else `./.shakedown`.
    pub fn resolve_data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join("shakedown")))
            .unwrap_or_else(|| PathBuf::from("./.shakedown"))
    }
}
