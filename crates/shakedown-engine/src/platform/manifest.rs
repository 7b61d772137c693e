use super::{AdapterSubscription, UpdateError, UpdateReadySink, WorkerLifecycle};
use crate::listeners::ListenerRegistry;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;
use url::Url;

#[derive(Debug, Deserialize)]
struct VersionManifest {
    version: String,
}

pub type ReloadHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Worker lifecycle for hosts without service workers: the "registration"
/// is a published JSON manifest (`{"version": "..."}`) and an update is any
/// version different from the one running.
pub struct ManifestWorkerLifecycle {
    client: reqwest::Client,
    manifest_url: Url,
    current_version: Mutex<String>,
    pending_version: Mutex<Option<String>>,
    ready: Arc<ListenerRegistry<()>>,
    reload: Option<ReloadHook>,
}

impl ManifestWorkerLifecycle {
    pub fn new(manifest_url: Url, current_version: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            manifest_url,
            current_version: Mutex::new(current_version.into()),
            pending_version: Mutex::new(None),
            ready: Arc::new(ListenerRegistry::new()),
            reload: None,
        }
    }

    /// Called with the activated version by `activate_and_reload`.
    pub fn with_reload_hook(mut self, hook: ReloadHook) -> Self {
        self.reload = Some(hook);
        self
    }

    pub fn current_version(&self) -> String {
        self.current_version
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn pending_version(&self) -> Option<String> {
        self.pending_version
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Record `remote` and return true if it is a newly seen version.
    fn note_remote_version(&self, remote: &str) -> bool {
        if remote == self.current_version() {
            return false;
        }
        let mut pending = self.pending_version.lock().unwrap_or_else(|e| e.into_inner());
        if pending.as_deref() == Some(remote) {
            return false;
        }
        *pending = Some(remote.to_string());
        true
    }
}

#[async_trait]
impl WorkerLifecycle for ManifestWorkerLifecycle {
    fn is_supported(&self) -> bool {
        true
    }

    async fn has_registration(&self) -> bool {
        true
    }

    async fn probe_update(&self) -> Result<(), UpdateError> {
        let manifest: VersionManifest = self
            .client
            .get(self.manifest_url.clone())
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| UpdateError::Probe(e.to_string()))?
            .json()
            .await
            .map_err(|e| UpdateError::Probe(format!("invalid manifest: {}", e)))?;

        if self.note_remote_version(manifest.version.trim()) {
            info!(version = %manifest.version, "New version available");
            self.ready.emit(&());
        }
        Ok(())
    }

    async fn activate_and_reload(&self) -> Result<(), UpdateError> {
        let Some(version) = self
            .pending_version
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            return Ok(());
        };
        *self.current_version.lock().unwrap_or_else(|e| e.into_inner()) = version.clone();
        info!(version = %version, "Activated new version");
        if let Some(reload) = &self.reload {
            reload(&version);
        }
        Ok(())
    }

    fn on_update_ready(&self, sink: UpdateReadySink) -> AdapterSubscription {
        let handle = self.ready.subscribe(move |_| sink());
        let weak = Arc::downgrade(&self.ready);
        AdapterSubscription::new(move || {
            if let Some(ready) = weak.upgrade() {
                ready.unsubscribe(handle);
            }
        })
    }
}
