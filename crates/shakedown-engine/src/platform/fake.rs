//! Deterministic in-memory adapters.

use super::{
    AdapterSubscription, CapturedFrame, EnvironmentProbe, HostEvent, HostEventSink, HostEvents,
    KeyValueStorage, MemoryProbe, MotionSample, MotionSensor, MotionSink, PermissionOutcome,
    ScreenCapture, UpdateError, UpdateReadySink, WorkerLifecycle,
};
use crate::listeners::ListenerRegistry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shakedown_common::{EnvironmentFacts, MemorySample};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn registry_subscription<T: 'static>(
    registry: &Arc<ListenerRegistry<T>>,
    callback: impl Fn(&T) + Send + Sync + 'static,
) -> AdapterSubscription {
    let handle = registry.subscribe(callback);
    let weak = Arc::downgrade(registry);
    AdapterSubscription::new(move || {
        if let Some(registry) = weak.upgrade() {
            registry.unsubscribe(handle);
        }
    })
}

#[derive(Default)]
pub struct MemoryKeyValueStorage {
    values: Mutex<HashMap<String, String>>,
    unavailable: AtomicBool,
}

impl MemoryKeyValueStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behave like storage in a private window: reads miss, writes vanish.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueStorage for MemoryKeyValueStorage {
    fn get(&self, key: &str) -> Option<String> {
        if self.unavailable.load(Ordering::SeqCst) {
            return None;
        }
        self.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        if self.unavailable.load(Ordering::SeqCst) {
            return;
        }
        self.lock().insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        if self.unavailable.load(Ordering::SeqCst) {
            return;
        }
        self.lock().remove(key);
    }
}

/// Motion sensor driven by [`emit`](ManualMotionSensor::emit).
pub struct ManualMotionSensor {
    supported: bool,
    requires_permission: bool,
    grant: Mutex<PermissionOutcome>,
    permission_requests: AtomicUsize,
    sinks: Arc<ListenerRegistry<MotionSample>>,
}

impl ManualMotionSensor {
    pub fn new(supported: bool, requires_permission: bool) -> Self {
        Self {
            supported,
            requires_permission,
            grant: Mutex::new(PermissionOutcome::Granted),
            permission_requests: AtomicUsize::new(0),
            sinks: Arc::new(ListenerRegistry::new()),
        }
    }

    pub fn supported() -> Self {
        Self::new(true, false)
    }

    /// Outcome the next permission request resolves to.
    pub fn set_grant_outcome(&self, outcome: PermissionOutcome) {
        *self.grant.lock().unwrap_or_else(|e| e.into_inner()) = outcome;
    }

    pub fn emit(&self, sample: MotionSample) {
        self.sinks.emit(&sample);
    }

    pub fn listener_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn permission_requests(&self) -> usize {
        self.permission_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MotionSensor for ManualMotionSensor {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn requires_permission(&self) -> bool {
        self.requires_permission
    }

    async fn request_permission(&self) -> PermissionOutcome {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
        *self.grant.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn subscribe(&self, sink: MotionSink) -> AdapterSubscription {
        registry_subscription(&self.sinks, move |sample: &MotionSample| sink(*sample))
    }
}

pub struct StaticScreenCapture {
    frame: Option<CapturedFrame>,
}

impl StaticScreenCapture {
    pub fn new(frame: Option<CapturedFrame>) -> Self {
        Self { frame }
    }
}

#[async_trait]
impl ScreenCapture for StaticScreenCapture {
    fn is_supported(&self) -> bool {
        true
    }

    async fn capture_frame(&self) -> Option<CapturedFrame> {
        self.frame.clone()
    }
}

/// Worker lifecycle with a controllable probe.
pub struct ManualWorkerLifecycle {
    supported: bool,
    registered: AtomicBool,
    probe_delay: Duration,
    fail_probe: AtomicBool,
    probe_calls: AtomicUsize,
    activate_calls: AtomicUsize,
    ready: Arc<ListenerRegistry<()>>,
}

impl ManualWorkerLifecycle {
    pub fn new() -> Self {
        Self {
            supported: true,
            registered: AtomicBool::new(true),
            probe_delay: Duration::ZERO,
            fail_probe: AtomicBool::new(false),
            probe_calls: AtomicUsize::new(0),
            activate_calls: AtomicUsize::new(0),
            ready: Arc::new(ListenerRegistry::new()),
        }
    }

    pub fn unsupported() -> Self {
        Self {
            supported: false,
            registered: AtomicBool::new(false),
            ..Self::new()
        }
    }

    /// Make every probe take `delay` before resolving.
    pub fn with_probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = delay;
        self
    }

    pub fn set_registered(&self, registered: bool) {
        self.registered.store(registered, Ordering::SeqCst);
    }

    pub fn set_fail_probe(&self, fail: bool) {
        self.fail_probe.store(fail, Ordering::SeqCst);
    }

    /// Push an unsolicited "new version ready" notification.
    pub fn announce_update(&self) {
        self.ready.emit(&());
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn activate_calls(&self) -> usize {
        self.activate_calls.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.ready.len()
    }
}

impl Default for ManualWorkerLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkerLifecycle for ManualWorkerLifecycle {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn has_registration(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    async fn probe_update(&self) -> Result<(), UpdateError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        if !self.probe_delay.is_zero() {
            tokio::time::sleep(self.probe_delay).await;
        }
        if self.fail_probe.load(Ordering::SeqCst) {
            return Err(UpdateError::Probe("simulated network failure".into()));
        }
        Ok(())
    }

    async fn activate_and_reload(&self) -> Result<(), UpdateError> {
        self.activate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_update_ready(&self, sink: UpdateReadySink) -> AdapterSubscription {
        registry_subscription(&self.ready, move |_: &()| sink())
    }
}

/// Heap probe returning whatever figures were last set.
#[derive(Default)]
pub struct FixedMemoryProbe {
    heap: Mutex<Option<(u64, u64, u64)>>,
}

impl FixedMemoryProbe {
    pub fn new(used: u64, total: u64, limit: u64) -> Self {
        Self {
            heap: Mutex::new(Some((used, total, limit))),
        }
    }

    pub fn set_heap(&self, used: u64, total: u64, limit: u64) {
        *self.heap.lock().unwrap_or_else(|e| e.into_inner()) = Some((used, total, limit));
    }
}

impl MemoryProbe for FixedMemoryProbe {
    fn is_supported(&self) -> bool {
        true
    }

    fn sample(&self, now: DateTime<Utc>) -> Option<MemorySample> {
        let heap = *self.heap.lock().unwrap_or_else(|e| e.into_inner());
        heap.map(|(used, total, limit)| MemorySample::from_heap(now, used, total, limit))
    }
}

pub struct StaticEnvironmentProbe {
    facts: EnvironmentFacts,
}

impl StaticEnvironmentProbe {
    pub fn new(facts: EnvironmentFacts) -> Self {
        Self { facts }
    }
}

impl EnvironmentProbe for StaticEnvironmentProbe {
    fn capture(&self) -> EnvironmentFacts {
        self.facts.clone()
    }
}

/// Host event stream fed by [`emit`](ManualHostEvents::emit).
#[derive(Default)]
pub struct ManualHostEvents {
    sinks: Arc<ListenerRegistry<HostEvent>>,
}

impl ManualHostEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: HostEvent) {
        self.sinks.emit(&event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sinks.len()
    }
}

impl HostEvents for ManualHostEvents {
    fn subscribe(&self, sink: HostEventSink) -> AdapterSubscription {
        registry_subscription(&self.sinks, move |event: &HostEvent| sink(event.clone()))
    }
}
