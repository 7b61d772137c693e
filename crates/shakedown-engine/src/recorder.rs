//! Flight recorder for a single app session.
//!
//! The recorder owns one in-memory [`SessionSnapshot`]. Host events and
//! explicit calls mutate it under rolling caps; a timer copies it into the
//! session archive every few seconds and trims the archive to
//! `max_sessions`. Reads of the archive only see what the last flush wrote.

use crate::clock::{Clock, SystemClock};
use crate::config::schema::RecorderConfig;
use crate::platform::native::{NativeEnvironmentProbe, NoHostEvents, UnsupportedMemoryProbe};
use crate::platform::{
    AdapterSubscription, EnvironmentProbe, HostEvent, HostEventSink, HostEvents, MemoryProbe,
};
use crate::store::{BoundedLog, Database};
use serde_json::json;
use shakedown_common::session::push_bounded;
use shakedown_common::{
    InteractionEvent, MemorySample, SessionSnapshot, SessionStats, StateChangeEvent, StoreError,
};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderPhase {
    Idle,
    Recording,
    Disposed,
}

/// Adapters the recorder depends on.
#[derive(Clone)]
pub struct RecorderDeps {
    pub database: Arc<dyn Database>,
    pub clock: Arc<dyn Clock>,
    pub environment: Arc<dyn EnvironmentProbe>,
    pub memory: Arc<dyn MemoryProbe>,
    pub host: Arc<dyn HostEvents>,
}

impl RecorderDeps {
    /// Defaults for everything but the database: system clock, facts about
    /// the native process, no heap introspection, no host events.
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self {
            database,
            clock: Arc::new(SystemClock),
            environment: Arc::new(NativeEnvironmentProbe::new(env!("CARGO_PKG_VERSION"))),
            memory: Arc::new(UnsupportedMemoryProbe),
            host: Arc::new(NoHostEvents),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_environment(mut self, environment: Arc<dyn EnvironmentProbe>) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_memory_probe(mut self, memory: Arc<dyn MemoryProbe>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_host_events(mut self, host: Arc<dyn HostEvents>) -> Self {
        self.host = host;
        self
    }
}

struct Lifecycle {
    phase: RecorderPhase,
    tasks: Vec<JoinHandle<()>>,
    host_subscription: Option<AdapterSubscription>,
}

struct RecorderInner {
    config: RecorderConfig,
    store: BoundedLog<SessionSnapshot>,
    clock: Arc<dyn Clock>,
    environment: Arc<dyn EnvironmentProbe>,
    memory: Arc<dyn MemoryProbe>,
    host: Arc<dyn HostEvents>,
    document: Mutex<SessionSnapshot>,
    lifecycle: Mutex<Lifecycle>,
    /// Held from snapshot to prune so writes land in call order.
    flush_gate: tokio::sync::Mutex<()>,
}

#[derive(Clone)]
pub struct SessionRecorder {
    inner: Arc<RecorderInner>,
}

impl SessionRecorder {
    /// Capture the environment and open a fresh session. Never spawns and
    /// never fails; call [`start`](Self::start) to begin observing.
    pub fn new(config: RecorderConfig, deps: RecorderDeps) -> Self {
        let document = SessionSnapshot::new(deps.environment.capture(), deps.clock.now());
        debug!(session_id = %document.session_id, "Session recorder created");
        Self {
            inner: Arc::new(RecorderInner {
                config,
                store: BoundedLog::new(deps.database),
                clock: deps.clock,
                environment: deps.environment,
                memory: deps.memory,
                host: deps.host,
                document: Mutex::new(document),
                lifecycle: Mutex::new(Lifecycle {
                    phase: RecorderPhase::Idle,
                    tasks: Vec::new(),
                    host_subscription: None,
                }),
                flush_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn phase(&self) -> RecorderPhase {
        self.inner.lifecycle().phase
    }

    pub fn session_id(&self) -> String {
        self.inner.document().session_id.clone()
    }

    /// Attach to host events and start the flush and memory-sampling timers.
    ///
    /// Returns false when the recorder has been disposed or when no async
    /// runtime is available; in the latter case it stays usable through
    /// explicit calls only.
    pub fn start(&self) -> bool {
        let mut lifecycle = self.inner.lifecycle();
        match lifecycle.phase {
            RecorderPhase::Recording => return true,
            RecorderPhase::Disposed => {
                warn!("Cannot start a disposed session recorder");
                return false;
            }
            RecorderPhase::Idle => {}
        }

        let Ok(runtime) = Handle::try_current() else {
            warn!("No async runtime available, recorder stays in no-op listening mode");
            return false;
        };

        let weak = Arc::downgrade(&self.inner);
        let sink_ref = weak.clone();
        let sink: HostEventSink = Arc::new(move |event: HostEvent| {
            if let Some(inner) = sink_ref.upgrade() {
                inner.handle_host_event(event);
            }
        });
        lifecycle.host_subscription = Some(self.inner.host.subscribe(sink));

        let config = &self.inner.config;
        if config.flush_interval_ms > 0 {
            let period = Duration::from_millis(config.flush_interval_ms);
            lifecycle.tasks.push(runtime.spawn(flush_loop(weak.clone(), period)));
        }
        if self.inner.memory.is_supported() && config.memory_sample_interval_ms > 0 {
            let period = Duration::from_millis(config.memory_sample_interval_ms);
            lifecycle.tasks.push(runtime.spawn(sample_loop(weak, period)));
        }

        lifecycle.phase = RecorderPhase::Recording;
        debug!(tasks = lifecycle.tasks.len(), "Session recorder started");
        true
    }

    pub fn record_interaction(&self, event: InteractionEvent) {
        self.inner.record_interaction(event);
    }

    pub fn record_state_change(&self, event: StateChangeEvent) {
        self.inner.record_state_change(event);
    }

    pub fn record_memory_sample(&self, sample: MemorySample) {
        self.inner.record_memory_sample(sample);
    }

    /// Take one heap sample now, if the platform supports it.
    pub fn sample_memory(&self) -> Option<MemorySample> {
        self.inner.sample_memory()
    }

    /// Replace the app-settings bag; other environment facts are untouched.
    pub fn set_app_settings(&self, settings: serde_json::Map<String, serde_json::Value>) {
        self.inner.document().environment.app_settings = settings;
    }

    /// Copy of the live document with `end_time` set to now.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot()
    }

    pub fn stats(&self) -> SessionStats {
        self.inner.document().stats(self.inner.clock.now())
    }

    /// Start a new session document. Already persisted sessions are kept.
    pub fn reset(&self) -> String {
        let fresh = SessionSnapshot::new(self.inner.environment.capture(), self.inner.clock.now());
        let session_id = fresh.session_id.clone();
        *self.inner.document() = fresh;
        debug!(session_id = %session_id, "Session reset");
        session_id
    }

    /// Persist a copy of the current document, then trim the archive.
    pub async fn flush(&self) -> Result<(), StoreError> {
        self.inner.flush().await
    }

    /// Stop timers, detach from host events and fire one final flush without
    /// waiting for it. Safe to call more than once.
    pub fn dispose(&self) {
        let (tasks, subscription) = {
            let mut lifecycle = self.inner.lifecycle();
            if lifecycle.phase == RecorderPhase::Disposed {
                return;
            }
            lifecycle.phase = RecorderPhase::Disposed;
            (
                std::mem::take(&mut lifecycle.tasks),
                lifecycle.host_subscription.take(),
            )
        };

        for task in tasks {
            task.abort();
        }
        drop(subscription);

        match Handle::try_current() {
            Ok(runtime) => {
                let inner = Arc::clone(&self.inner);
                runtime.spawn(async move {
                    if let Err(e) = inner.flush().await {
                        warn!("Final session flush failed: {}", e);
                    }
                });
            }
            Err(_) => debug!("No async runtime available, final flush skipped"),
        }
        debug!("Session recorder disposed");
    }

    /// Persisted sessions, newest first.
    pub async fn stored_sessions(&self) -> Vec<SessionSnapshot> {
        self.inner.store.newest_first().await
    }

    pub async fn stored_session_count(&self) -> Result<usize, StoreError> {
        self.inner.store.count().await
    }

    pub async fn export_sessions_json(&self) -> String {
        self.inner.store.export_json().await
    }

    pub async fn clear_stored_sessions(&self) -> Result<(), StoreError> {
        self.inner.store.clear_all().await
    }
}

impl RecorderInner {
    fn document(&self) -> MutexGuard<'_, SessionSnapshot> {
        self.document.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record_interaction(&self, event: InteractionEvent) {
        let cap = self.config.max_interactions;
        push_bounded(&mut self.document().interactions, event, cap);
    }

    fn record_state_change(&self, event: StateChangeEvent) {
        let cap = self.config.max_state_changes;
        push_bounded(&mut self.document().state_changes, event, cap);
    }

    fn record_memory_sample(&self, sample: MemorySample) {
        if let Some(percent) = sample.percent_used {
            if percent > self.config.memory_warning_percent {
                warn!(
                    percent_used = percent,
                    threshold = self.config.memory_warning_percent,
                    "High memory usage"
                );
            }
        }
        let cap = self.config.max_memory_samples;
        push_bounded(&mut self.document().memory_samples, sample, cap);
    }

    fn sample_memory(&self) -> Option<MemorySample> {
        let sample = self.memory.sample(self.clock.now())?;
        self.record_memory_sample(sample.clone());
        Some(sample)
    }

    fn snapshot(&self) -> SessionSnapshot {
        let mut copy = self.document().clone();
        copy.end_time = Some(self.clock.now());
        copy
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let _gate = self.flush_gate.lock().await;
        let snapshot = self.snapshot();
        self.store.insert_or_replace(&snapshot).await?;
        self.store.enforce_capacity(self.config.max_sessions).await?;
        Ok(())
    }

    fn handle_host_event(self: Arc<Self>, event: HostEvent) {
        let now = self.clock.now();
        match event {
            HostEvent::Interaction(interaction) => self.record_interaction(interaction),
            HostEvent::Error { message, detail } => self.record_state_change(
                StateChangeEvent::new(StateChangeEvent::ERROR, now)
                    .with_detail(json!({ "message": message, "detail": detail })),
            ),
            HostEvent::UnhandledRejection { reason } => self.record_state_change(
                StateChangeEvent::new(StateChangeEvent::UNHANDLED_REJECTION, now)
                    .with_detail(json!({ "reason": reason })),
            ),
            HostEvent::Teardown => match Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move {
                        if let Err(e) = self.flush().await {
                            warn!("Teardown flush failed: {}", e);
                        }
                    });
                }
                Err(_) => warn!("Teardown received outside an async runtime, flush skipped"),
            },
        }
    }
}

async fn flush_loop(recorder: Weak<RecorderInner>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = recorder.upgrade() else {
            break;
        };
        // Detached so aborting this loop never cuts a write short.
        let write = tokio::spawn(async move { inner.flush().await });
        match write.await {
            Ok(Err(e)) => warn!("Auto-flush failed: {}", e),
            Err(e) => warn!("Auto-flush task failed: {}", e),
            Ok(Ok(())) => {}
        }
    }
}

async fn sample_loop(recorder: Weak<RecorderInner>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = recorder.upgrade() else {
            break;
        };
        inner.sample_memory();
    }
}
