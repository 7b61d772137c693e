use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Version stamped into every persisted session snapshot.
pub const SNAPSHOT_SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Click,
    Keydown,
    Keyup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionEvent {
    pub kind: InteractionKind,
    pub timestamp: DateTime<Utc>,
    pub target_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl InteractionEvent {
    pub fn new(
        kind: InteractionKind,
        timestamp: DateTime<Utc>,
        target_description: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            timestamp,
            target_description: target_description.into(),
            detail: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChangeEvent {
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl StateChangeEvent {
    /// Kind counted by [`SessionStats::error_count`].
    pub const ERROR: &'static str = "error";
    pub const UNHANDLED_REJECTION: &'static str = "unhandledrejection";

    pub fn new(kind: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind: kind.into(),
            timestamp,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn is_error(&self) -> bool {
        self.kind == Self::ERROR
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySample {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_bytes: Option<u64>,
    #[serde(default, rename = "usedMB", skip_serializing_if = "Option::is_none")]
    pub used_mb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent_used: Option<f64>,
}

impl MemorySample {
    /// Build a sample from raw heap figures, deriving megabytes and the
    /// percentage of the heap limit in use (both rounded to two decimals).
    pub fn from_heap(timestamp: DateTime<Utc>, used: u64, total: u64, limit: u64) -> Self {
        let used_mb = round2(used as f64 / (1024.0 * 1024.0));
        let percent_used = (limit > 0).then(|| round2(used as f64 / limit as f64 * 100.0));
        Self {
            timestamp,
            used_bytes: Some(used),
            total_bytes: Some(total),
            limit_bytes: Some(limit),
            used_mb: Some(used_mb),
            percent_used,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Facts about the host captured once when a session starts.
///
/// Every field has a safe default so a recorder can be built where no host
/// information is available at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvironmentFacts {
    pub app_version: String,
    pub build_commit: Option<String>,
    pub build_time: Option<String>,
    pub build_mode: Option<String>,
    pub user_agent: String,
    pub platform: String,
    pub language: String,
    pub languages: Vec<String>,
    pub screen_width: u32,
    pub screen_height: u32,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub device_pixel_ratio: f64,
    pub orientation: Option<String>,
    pub hardware_concurrency: Option<u32>,
    pub device_memory_gb: Option<f64>,
    pub max_touch_points: Option<u32>,
    pub gpu_vendor: Option<String>,
    pub gpu_renderer: Option<String>,
    pub codec_support: Option<BTreeMap<String, bool>>,
    pub app_settings: serde_json::Map<String, serde_json::Value>,
}

impl Default for EnvironmentFacts {
    fn default() -> Self {
        Self {
            app_version: "unknown".to_string(),
            build_commit: None,
            build_time: None,
            build_mode: None,
            user_agent: "unknown".to_string(),
            platform: "unknown".to_string(),
            language: "en".to_string(),
            languages: Vec::new(),
            screen_width: 0,
            screen_height: 0,
            viewport_width: 0,
            viewport_height: 0,
            device_pixel_ratio: 1.0,
            orientation: None,
            hardware_concurrency: None,
            device_memory_gb: None,
            max_touch_points: None,
            gpu_vendor: None,
            gpu_renderer: None,
            codec_support: None,
            app_settings: serde_json::Map::new(),
        }
    }
}

/// The recorder's document: everything captured during one app session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub schema_version: String,
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub environment: EnvironmentFacts,
    #[serde(default)]
    pub interactions: Vec<InteractionEvent>,
    #[serde(default)]
    pub state_changes: Vec<StateChangeEvent>,
    #[serde(default)]
    pub memory_samples: Vec<MemorySample>,
}

impl SessionSnapshot {
    pub fn new(environment: EnvironmentFacts, start_time: DateTime<Utc>) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION.to_string(),
            session_id: Uuid::new_v4().to_string(),
            start_time,
            end_time: None,
            environment,
            interactions: Vec::new(),
            state_changes: Vec::new(),
            memory_samples: Vec::new(),
        }
    }

    pub fn stats(&self, now: DateTime<Utc>) -> SessionStats {
        SessionStats {
            duration_ms: (now - self.start_time).num_milliseconds().max(0),
            interaction_count: self.interactions.len(),
            state_change_count: self.state_changes.len(),
            memory_sample_count: self.memory_samples.len(),
            error_count: self.state_changes.iter().filter(|e| e.is_error()).count(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub duration_ms: i64,
    pub interaction_count: usize,
    pub state_change_count: usize,
    pub memory_sample_count: usize,
    pub error_count: usize,
}

/// Append `item`, then drop from the front until at most `cap` remain.
pub fn push_bounded<T>(items: &mut Vec<T>, item: T, cap: usize) {
    items.push(item);
    if items.len() > cap {
        let excess = items.len() - cap;
        items.drain(..excess);
    }
}
