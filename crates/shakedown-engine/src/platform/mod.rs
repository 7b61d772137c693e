//! Adapters for the host capabilities the debugging tools sit on.
//!
//! Each capability is a small trait. `native` holds the implementations used
//! by the CLI host, `fake` holds deterministic stand-ins for tests and demos.

pub mod fake;
pub mod manifest;
pub mod native;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use shakedown_common::{EnvironmentFacts, InteractionEvent, MemorySample};
use std::sync::Arc;
use thiserror::Error;

/// Handle to a registration made with an adapter. Cancels on drop.
pub struct AdapterSubscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl AdapterSubscription {
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to undo.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for AdapterSubscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for AdapterSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterSubscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

// Key-value storage

/// Small string store that must never fail loudly: when unavailable, reads
/// return `None` and writes are dropped.
pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

// Motion sensor

/// One 3-axis reading; browsers may leave any axis empty.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AxisReading {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

impl AxisReading {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            z: Some(z),
        }
    }

    /// Euclidean length, or `None` if any axis is missing.
    pub fn magnitude(&self) -> Option<f64> {
        let (x, y, z) = (self.x?, self.y?, self.z?);
        Some((x * x + y * y + z * z).sqrt())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotionSample {
    /// Gravity-compensated acceleration.
    pub acceleration: Option<AxisReading>,
    pub acceleration_including_gravity: Option<AxisReading>,
}

impl MotionSample {
    pub fn compensated(x: f64, y: f64, z: f64) -> Self {
        Self {
            acceleration: Some(AxisReading::new(x, y, z)),
            acceleration_including_gravity: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionOutcome {
    Granted,
    Denied,
    /// The grant flow itself is missing on this platform.
    Unavailable,
}

pub type MotionSink = Arc<dyn Fn(MotionSample) + Send + Sync>;

#[async_trait]
pub trait MotionSensor: Send + Sync {
    fn is_supported(&self) -> bool;

    /// Whether samples are gated behind an explicit one-time grant.
    fn requires_permission(&self) -> bool;

    async fn request_permission(&self) -> PermissionOutcome;

    fn subscribe(&self, sink: MotionSink) -> AdapterSubscription;
}

// Screen capture

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl CapturedFrame {
    pub fn png(bytes: Vec<u8>) -> Self {
        Self {
            mime_type: "image/png".to_string(),
            bytes,
        }
    }

    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, STANDARD.encode(&self.bytes))
    }
}

#[async_trait]
pub trait ScreenCapture: Send + Sync {
    fn is_supported(&self) -> bool;

    /// A single still frame. Failure and user cancellation both yield `None`.
    async fn capture_frame(&self) -> Option<CapturedFrame>;
}

// Worker lifecycle

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("Update probe failed: {0}")]
    Probe(String),
    #[error("Activation failed: {0}")]
    Activation(String),
    #[error("Worker lifecycle API unavailable")]
    Unsupported,
}

pub type UpdateReadySink = Arc<dyn Fn() + Send + Sync>;

#[async_trait]
pub trait WorkerLifecycle: Send + Sync {
    fn is_supported(&self) -> bool;

    /// Whether a worker registration currently exists.
    async fn has_registration(&self) -> bool;

    /// Ask the platform to look for a new version. A found version is
    /// announced through [`on_update_ready`](Self::on_update_ready).
    async fn probe_update(&self) -> Result<(), UpdateError>;

    /// Activate the waiting version and reload the host.
    async fn activate_and_reload(&self) -> Result<(), UpdateError>;

    fn on_update_ready(&self, sink: UpdateReadySink) -> AdapterSubscription;
}

// Heap introspection

pub trait MemoryProbe: Send + Sync {
    fn is_supported(&self) -> bool;
    fn sample(&self, now: DateTime<Utc>) -> Option<MemorySample>;
}

// Environment

pub trait EnvironmentProbe: Send + Sync {
    fn capture(&self) -> EnvironmentFacts;
}

// Host events

/// Events the host pushes into the recorder while it is recording.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Interaction(InteractionEvent),
    Error {
        message: String,
        detail: Option<serde_json::Value>,
    },
    UnhandledRejection {
        reason: String,
    },
    /// The application is about to go away.
    Teardown,
}

pub type HostEventSink = Arc<dyn Fn(HostEvent) + Send + Sync>;

pub trait HostEvents: Send + Sync {
    fn subscribe(&self, sink: HostEventSink) -> AdapterSubscription;
}
