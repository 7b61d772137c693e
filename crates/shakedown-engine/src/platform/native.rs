//! Adapters for running on a plain native host, where motion sensors, screen
//! capture and heap introspection are not available.

use super::{
    AdapterSubscription, CapturedFrame, EnvironmentProbe, HostEventSink, HostEvents,
    KeyValueStorage, MemoryProbe, MotionSensor, MotionSink, PermissionOutcome, ScreenCapture,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shakedown_common::{EnvironmentFacts, MemorySample};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Key-value storage kept as a JSON object in a single file.
///
/// I/O problems are logged and degrade to "reads miss, writes are dropped".
pub struct FileKeyValueStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileKeyValueStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> BTreeMap<String, String> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), "Ignoring unreadable key-value file: {}", e);
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(path = %self.path.display(), "Key-value storage unavailable: {}", e);
                BTreeMap::new()
            }
        }
    }

    fn write_map(&self, map: &BTreeMap<String, String>) {
        let result = serde_json::to_string_pretty(map)
            .map_err(std::io::Error::other)
            .and_then(|json| {
                if let Some(parent) = self.path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&self.path, json)
            });
        if let Err(e) = result {
            warn!(path = %self.path.display(), "Dropping key-value write: {}", e);
        }
    }

    fn update(&self, f: impl FnOnce(&mut BTreeMap<String, String>)) {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut map = self.read_map();
        f(&mut map);
        self.write_map(&map);
    }
}

impl KeyValueStorage for FileKeyValueStorage {
    fn get(&self, key: &str) -> Option<String> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.read_map().remove(key)
    }

    fn set(&self, key: &str, value: &str) {
        self.update(|map| {
            map.insert(key.to_string(), value.to_string());
        });
    }

    fn remove(&self, key: &str) {
        self.update(|map| {
            map.remove(key);
        });
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedMotionSensor;

#[async_trait]
impl MotionSensor for UnsupportedMotionSensor {
    fn is_supported(&self) -> bool {
        false
    }

    fn requires_permission(&self) -> bool {
        false
    }

    async fn request_permission(&self) -> PermissionOutcome {
        PermissionOutcome::Unavailable
    }

    fn subscribe(&self, _sink: MotionSink) -> AdapterSubscription {
        AdapterSubscription::noop()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedScreenCapture;

#[async_trait]
impl ScreenCapture for UnsupportedScreenCapture {
    fn is_supported(&self) -> bool {
        false
    }

    async fn capture_frame(&self) -> Option<CapturedFrame> {
        None
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedMemoryProbe;

impl MemoryProbe for UnsupportedMemoryProbe {
    fn is_supported(&self) -> bool {
        false
    }

    fn sample(&self, _now: DateTime<Utc>) -> Option<MemorySample> {
        None
    }
}

/// Host that never pushes events; the recorder only sees explicit calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHostEvents;

impl HostEvents for NoHostEvents {
    fn subscribe(&self, _sink: HostEventSink) -> AdapterSubscription {
        AdapterSubscription::noop()
    }
}

/// Describes the native process: build identity, OS, locale and CPU count.
#[derive(Debug, Clone)]
pub struct NativeEnvironmentProbe {
    pub app_version: String,
    pub build_mode: Option<String>,
}

impl NativeEnvironmentProbe {
    pub fn new(app_version: impl Into<String>) -> Self {
        Self {
            app_version: app_version.into(),
            build_mode: Some(if cfg!(debug_assertions) { "debug" } else { "release" }.into()),
        }
    }
}

/// `en_US.UTF-8` -> `en-US`
fn locale_to_language_tag(locale: &str) -> Option<String> {
    let base = locale.split(['.', '@']).next()?.trim();
    if base.is_empty() || base == "C" || base == "POSIX" {
        return None;
    }
    Some(base.replace('_', "-"))
}

impl EnvironmentProbe for NativeEnvironmentProbe {
    fn capture(&self) -> EnvironmentFacts {
        let language = ["LC_ALL", "LANG"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find_map(|v| locale_to_language_tag(&v));

        let mut facts = EnvironmentFacts {
            app_version: self.app_version.clone(),
            build_mode: self.build_mode.clone(),
            user_agent: format!(
                "shakedown/{} ({}; {})",
                self.app_version,
                std::env::consts::OS,
                std::env::consts::ARCH
            ),
            platform: std::env::consts::OS.to_string(),
            hardware_concurrency: std::thread::available_parallelism()
                .ok()
                .map(|n| n.get() as u32),
            ..EnvironmentFacts::default()
        };
        if let Some(language) = language {
            facts.languages = vec![language.clone()];
            facts.language = language;
        }
        facts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locale_to_language_tag() {
        assert_eq!(locale_to_language_tag("en_US.UTF-8"), Some("en-US".into()));
        assert_eq!(locale_to_language_tag("de_DE@euro"), Some("de-DE".into()));
        assert_eq!(locale_to_language_tag("C"), None);
        assert_eq!(locale_to_language_tag(""), None);
    }

    #[test]
    fn test_file_storage_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileKeyValueStorage::new(dir.path().join("nested").join("kv.json"));
        assert_eq!(storage.get("missing"), None);

        storage.set("a", "1");
        storage.set("b", "2");
        storage.remove("a");
        assert_eq!(storage.get("a"), None);
        assert_eq!(storage.get("b"), Some("2".into()));

        let reopened = FileKeyValueStorage::new(storage.path().to_path_buf());
        assert_eq!(reopened.get("b"), Some("2".into()));
    }

    #[test]
    fn test_file_storage_tolerates_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.json");
        std::fs::write(&path, "not json").unwrap();
        let storage = FileKeyValueStorage::new(&path);
        assert_eq!(storage.get("a"), None);
        storage.set("a", "1");
        assert_eq!(storage.get("a"), Some("1".into()));
    }

    #[test]
    fn test_native_environment_has_platform() {
        let facts = NativeEnvironmentProbe::new("0.1.0").capture();
        assert_eq!(facts.platform, std::env::consts::OS);
        assert!(facts.user_agent.starts_with("shakedown/0.1.0"));
    }
}
