//! Shake gesture detection over motion-sensor samples.

use crate::clock::Clock;
use crate::config::schema::ShakeConfig;
use crate::listeners::{ListenerHandle, ListenerRegistry};
use crate::platform::{
    AdapterSubscription, MotionSample, MotionSensor, MotionSink, PermissionOutcome,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShakeState {
    pub supported: bool,
    pub has_permission: bool,
    pub last_shake_time: Option<DateTime<Utc>>,
}

/// An accepted shake.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShakeEvent {
    pub timestamp: DateTime<Utc>,
    pub magnitude: f64,
}

struct Control {
    state: ShakeState,
    enabled: bool,
    disposed: bool,
    subscription: Option<AdapterSubscription>,
}

struct ShakeInner {
    sensor: Arc<dyn MotionSensor>,
    clock: Arc<dyn Clock>,
    threshold: f64,
    cooldown_ms: i64,
    control: Mutex<Control>,
    shake_listeners: ListenerRegistry<ShakeEvent>,
    state_listeners: ListenerRegistry<ShakeState>,
}

pub struct ShakeDetector {
    inner: Arc<ShakeInner>,
}

impl ShakeDetector {
    /// Support and the initial permission come from the sensor. The detector
    /// starts disabled.
    pub fn new(
        config: &ShakeConfig,
        sensor: Arc<dyn MotionSensor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state = ShakeState {
            supported: sensor.is_supported(),
            has_permission: !sensor.requires_permission(),
            last_shake_time: None,
        };
        Self {
            inner: Arc::new(ShakeInner {
                sensor,
                clock,
                threshold: config.threshold,
                cooldown_ms: config.cooldown_ms as i64,
                control: Mutex::new(Control {
                    state,
                    enabled: false,
                    disposed: false,
                    subscription: None,
                }),
                shake_listeners: ListenerRegistry::new(),
                state_listeners: ListenerRegistry::new(),
            }),
        }
    }

    pub fn state(&self) -> ShakeState {
        self.inner.control().state
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.control().enabled
    }

    pub fn is_listening(&self) -> bool {
        self.inner.control().subscription.is_some()
    }

    /// Ask for motion access. Resolves true when access is not required or
    /// already held; false when the sensor is absent or the grant fails.
    pub async fn request_permission(&self) -> bool {
        {
            let control = self.inner.control();
            if control.disposed || !control.state.supported {
                return false;
            }
            if control.state.has_permission {
                return true;
            }
        }

        match self.inner.sensor.request_permission().await {
            PermissionOutcome::Granted => {
                let state = {
                    let mut control = self.inner.control();
                    if control.disposed {
                        return false;
                    }
                    control.state.has_permission = true;
                    if control.enabled {
                        self.inner.start_listening(&mut control);
                    }
                    control.state
                };
                info!("Motion permission granted");
                self.inner.state_listeners.emit(&state);
                true
            }
            PermissionOutcome::Denied => {
                info!("Motion permission denied");
                false
            }
            PermissionOutcome::Unavailable => false,
        }
    }

    /// Turn detection on or off. Enabling without permission waits for a
    /// later grant before listening.
    pub fn set_enabled(&self, enabled: bool) {
        let released = {
            let mut control = self.inner.control();
            if control.disposed {
                return;
            }
            control.enabled = enabled;
            if enabled {
                if control.state.supported && control.state.has_permission {
                    self.inner.start_listening(&mut control);
                }
                None
            } else {
                control.subscription.take()
            }
        };
        if released.is_some() {
            debug!("Shake detection stopped");
        }
    }

    /// Feed one sensor sample through the detector. Ignored unless detection
    /// is enabled and motion access is held.
    pub fn handle_sample(&self, sample: MotionSample) {
        self.inner.handle_sample(sample);
    }

    pub fn on_shake<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&ShakeEvent) + Send + Sync + 'static,
    {
        self.inner.shake_listeners.subscribe(callback)
    }

    pub fn on_state_change<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&ShakeState) + Send + Sync + 'static,
    {
        self.inner.state_listeners.subscribe(callback)
    }

    pub fn remove_shake_listener(&self, handle: ListenerHandle) -> bool {
        self.inner.shake_listeners.unsubscribe(handle)
    }

    pub fn remove_state_listener(&self, handle: ListenerHandle) -> bool {
        self.inner.state_listeners.unsubscribe(handle)
    }

    /// Stop listening and drop every callback. Terminal.
    pub fn dispose(&self) {
        let subscription = {
            let mut control = self.inner.control();
            if control.disposed {
                return;
            }
            control.disposed = true;
            control.enabled = false;
            control.subscription.take()
        };
        drop(subscription);
        self.inner.shake_listeners.clear();
        self.inner.state_listeners.clear();
    }
}

impl Drop for ShakeDetector {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl ShakeInner {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn start_listening(self: &Arc<Self>, control: &mut Control) {
        if control.subscription.is_some() {
            return;
        }
        let weak = Arc::downgrade(self);
        let sink: MotionSink = Arc::new(move |sample: MotionSample| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_sample(sample);
            }
        });
        control.subscription = Some(self.sensor.subscribe(sink));
        debug!("Shake detection listening");
    }

    fn handle_sample(&self, sample: MotionSample) {
        let Some(reading) = sample
            .acceleration
            .or(sample.acceleration_including_gravity)
        else {
            return;
        };
        let Some(magnitude) = reading.magnitude() else {
            return;
        };
        if magnitude <= self.threshold {
            return;
        }

        let now = self.clock.now();
        let state = {
            let mut control = self.control();
            if control.disposed || !control.enabled || !control.state.has_permission {
                return;
            }
            if let Some(last) = control.state.last_shake_time {
                if (now - last).num_milliseconds() <= self.cooldown_ms {
                    return;
                }
            }
            control.state.last_shake_time = Some(now);
            control.state
        };

        debug!(magnitude, "Shake detected");
        self.shake_listeners.emit(&ShakeEvent {
            timestamp: now,
            magnitude,
        });
        self.state_listeners.emit(&state);
    }
}
