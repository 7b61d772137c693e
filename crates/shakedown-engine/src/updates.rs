//! Periodic "is there a new version?" checks against the worker lifecycle.

use crate::clock::Clock;
use crate::config::schema::UpdateConfig;
use crate::listeners::{ListenerHandle, ListenerRegistry};
use crate::platform::{AdapterSubscription, KeyValueStorage, UpdateError, WorkerLifecycle};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Storage key holding the RFC 3339 time of the last successful check.
pub const LAST_CHECK_KEY: &str = "shakedown.lastUpdateCheck";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCheckState {
    pub update_available: bool,
    pub is_checking: bool,
    pub last_check_time: Option<DateTime<Utc>>,
    pub worker_available: bool,
}

struct Control {
    state: UpdateCheckState,
    disposed: bool,
    timer: Option<JoinHandle<()>>,
    subscription: Option<AdapterSubscription>,
}

struct CheckerInner {
    lifecycle: Arc<dyn WorkerLifecycle>,
    storage: Arc<dyn KeyValueStorage>,
    clock: Arc<dyn Clock>,
    config: UpdateConfig,
    control: Mutex<Control>,
    listeners: ListenerRegistry<UpdateCheckState>,
}

pub struct UpdateChecker {
    inner: Arc<CheckerInner>,
}

impl UpdateChecker {
    /// Restores the last check time from storage and subscribes to the
    /// lifecycle's "update ready" notifications. Timers start with
    /// [`start`](Self::start).
    pub fn new(
        config: UpdateConfig,
        lifecycle: Arc<dyn WorkerLifecycle>,
        storage: Arc<dyn KeyValueStorage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let last_check_time = storage
            .get(LAST_CHECK_KEY)
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|t| t.with_timezone(&Utc));

        let inner = Arc::new(CheckerInner {
            lifecycle,
            storage,
            clock,
            config,
            control: Mutex::new(Control {
                state: UpdateCheckState {
                    update_available: false,
                    is_checking: false,
                    last_check_time,
                    worker_available: false,
                },
                disposed: false,
                timer: None,
                subscription: None,
            }),
            listeners: ListenerRegistry::new(),
        });

        let weak = Arc::downgrade(&inner);
        let subscription = inner.lifecycle.on_update_ready(Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.mark_update_available();
            }
        }));
        inner.control().subscription = Some(subscription);

        Self { inner }
    }

    pub fn state(&self) -> UpdateCheckState {
        self.inner.control().state
    }

    /// Spawn the periodic check. A non-positive interval disables it, though
    /// `check_on_start` still runs one check.
    pub fn start(&self) -> bool {
        let Ok(runtime) = Handle::try_current() else {
            warn!("No async runtime available, periodic update checks disabled");
            return false;
        };

        let mut control = self.inner.control();
        if control.disposed {
            return false;
        }
        if control.timer.is_some() {
            return true;
        }

        let weak = Arc::downgrade(&self.inner);
        let interval_ms = self.inner.config.check_interval_ms;
        let check_on_start = self.inner.config.check_on_start;
        if interval_ms > 0 {
            let period = Duration::from_millis(interval_ms as u64);
            control.timer = Some(runtime.spawn(check_loop(weak, period, check_on_start)));
        } else if check_on_start {
            control.timer = Some(runtime.spawn(async move {
                if let Some(inner) = weak.upgrade() {
                    inner.check().await;
                }
            }));
        }
        true
    }

    /// Run one check unless one is already in flight, in which case this
    /// returns false immediately without touching the lifecycle.
    pub async fn check_for_update(&self) -> bool {
        self.inner.check().await
    }

    pub async fn apply_update(&self) -> Result<(), UpdateError> {
        self.inner.lifecycle.activate_and_reload().await
    }

    pub fn subscribe<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&UpdateCheckState) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(callback)
    }

    pub fn unsubscribe(&self, handle: ListenerHandle) -> bool {
        self.inner.listeners.unsubscribe(handle)
    }

    /// Cancel the timer and the lifecycle subscription and silence every
    /// listener, including ones registered before this call.
    pub fn dispose(&self) {
        let (timer, subscription) = {
            let mut control = self.inner.control();
            if control.disposed {
                return;
            }
            control.disposed = true;
            (control.timer.take(), control.subscription.take())
        };
        if let Some(timer) = timer {
            timer.abort();
        }
        drop(subscription);
        self.inner.listeners.clear();
        debug!("Update checker disposed");
    }
}

impl Drop for UpdateChecker {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl CheckerInner {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, state: UpdateCheckState) {
        if self.control().disposed {
            return;
        }
        self.listeners.emit(&state);
    }

    fn mark_update_available(&self) {
        let state = {
            let mut control = self.control();
            if control.disposed {
                return;
            }
            control.state.update_available = true;
            control.state
        };
        info!("Update available");
        self.publish(state);
    }

    async fn check(&self) -> bool {
        let started = {
            let mut control = self.control();
            if control.disposed || control.state.is_checking {
                return false;
            }
            control.state.is_checking = true;
            control.state
        };
        self.publish(started);

        let mut outcome = None;
        if self.lifecycle.is_supported() {
            match self.lifecycle.probe_update().await {
                Ok(()) => {
                    let now = self.clock.now();
                    self.storage.set(LAST_CHECK_KEY, &now.to_rfc3339());
                    let worker_available = self.lifecycle.has_registration().await;
                    outcome = Some((now, worker_available));
                }
                Err(e) => warn!("Update check failed: {}", e),
            }
        } else {
            debug!("Worker lifecycle unsupported, skipping update probe");
        }

        let finished = {
            let mut control = self.control();
            if let Some((now, worker_available)) = outcome {
                control.state.last_check_time = Some(now);
                control.state.worker_available = worker_available;
            }
            control.state.is_checking = false;
            control.state
        };
        self.publish(finished);
        true
    }
}

async fn check_loop(checker: Weak<CheckerInner>, period: Duration, check_on_start: bool) {
    let start = if check_on_start {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = checker.upgrade() else {
            break;
        };
        inner.check().await;
    }
}
