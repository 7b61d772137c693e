use chrono::{TimeZone, Utc};
use shakedown_engine::clock::{Clock, ManualClock};
use shakedown_engine::config::schema::ShakeConfig;
use shakedown_engine::platform::fake::ManualMotionSensor;
use shakedown_engine::platform::{AxisReading, MotionSample, PermissionOutcome};
use shakedown_engine::shake::{ShakeDetector, ShakeState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

struct Harness {
    sensor: Arc<ManualMotionSensor>,
    clock: Arc<ManualClock>,
    detector: ShakeDetector,
    shakes: Arc<AtomicUsize>,
}

fn harness(sensor: ManualMotionSensor) -> Harness {
    let sensor = Arc::new(sensor);
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap(),
    ));
    let detector = ShakeDetector::new(&ShakeConfig::default(), sensor.clone(), clock.clone());
    let shakes = Arc::new(AtomicUsize::new(0));
    let counter = shakes.clone();
    detector.on_shake(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    Harness {
        sensor,
        clock,
        detector,
        shakes,
    }
}

fn strong() -> MotionSample {
    MotionSample::compensated(20.0, 20.0, 20.0)
}

#[test]
fn test_shake_respects_cooldown() {
    let h = harness(ManualMotionSensor::supported());
    h.detector.set_enabled(true);

    h.sensor.emit(strong());
    assert_eq!(h.shakes.load(Ordering::SeqCst), 1);

    h.clock.advance_ms(1500);
    h.sensor.emit(strong());
    assert_eq!(h.shakes.load(Ordering::SeqCst), 1);

    // Cooldown is measured from the last accepted shake
    h.clock.advance_ms(501);
    h.sensor.emit(strong());
    assert_eq!(h.shakes.load(Ordering::SeqCst), 2);
}

#[test]
fn test_cooldown_boundary_is_exclusive() {
    let h = harness(ManualMotionSensor::supported());
    h.detector.set_enabled(true);

    h.sensor.emit(strong());
    h.clock.advance_ms(2000);
    h.sensor.emit(strong());
    assert_eq!(h.shakes.load(Ordering::SeqCst), 1);

    h.clock.advance_ms(1);
    h.sensor.emit(strong());
    assert_eq!(h.shakes.load(Ordering::SeqCst), 2);
}

#[test]
fn test_weak_or_incomplete_samples_ignored() {
    let h = harness(ManualMotionSensor::supported());
    h.detector.set_enabled(true);

    h.sensor.emit(MotionSample::compensated(10.0, 10.0, 10.0));
    h.sensor.emit(MotionSample {
        acceleration: Some(AxisReading {
            x: Some(40.0),
            y: None,
            z: Some(40.0),
        }),
        acceleration_including_gravity: None,
    });
    h.sensor.emit(MotionSample::default());

    assert_eq!(h.shakes.load(Ordering::SeqCst), 0);
    assert_eq!(h.detector.state().last_shake_time, None);
}

#[test]
fn test_falls_back_to_gravity_vector() {
    let h = harness(ManualMotionSensor::supported());
    h.detector.set_enabled(true);

    h.sensor.emit(MotionSample {
        acceleration: None,
        acceleration_including_gravity: Some(AxisReading::new(20.0, 20.0, 20.0)),
    });
    assert_eq!(h.shakes.load(Ordering::SeqCst), 1);
    assert_eq!(h.detector.state().last_shake_time, Some(h.clock.now()));
}

#[test]
fn test_shake_event_and_state_change() {
    let h = harness(ManualMotionSensor::supported());
    let magnitudes = Arc::new(Mutex::new(Vec::new()));
    let states: Arc<Mutex<Vec<ShakeState>>> = Arc::new(Mutex::new(Vec::new()));
    let m = magnitudes.clone();
    let s = states.clone();
    h.detector.on_shake(move |event| m.lock().unwrap().push(event.magnitude));
    h.detector.on_state_change(move |state| s.lock().unwrap().push(*state));
    h.detector.set_enabled(true);

    h.sensor.emit(strong());

    let magnitudes = magnitudes.lock().unwrap();
    assert_eq!(magnitudes.len(), 1);
    assert!((magnitudes[0] - 34.641).abs() < 0.001);

    let states = states.lock().unwrap();
    assert_eq!(states.len(), 1);
    assert!(states[0].last_shake_time.is_some());
}

#[test]
fn test_enable_disable_listening() {
    let h = harness(ManualMotionSensor::supported());
    assert!(!h.detector.is_enabled());
    assert_eq!(h.sensor.listener_count(), 0);

    h.detector.set_enabled(true);
    h.detector.set_enabled(true);
    assert!(h.detector.is_listening());
    assert_eq!(h.sensor.listener_count(), 1);

    h.detector.set_enabled(false);
    h.detector.set_enabled(false);
    assert!(!h.detector.is_listening());
    assert_eq!(h.sensor.listener_count(), 0);

    h.sensor.emit(strong());
    assert_eq!(h.shakes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_permission_not_required() {
    let h = harness(ManualMotionSensor::supported());
    assert!(h.detector.state().has_permission);
    assert!(h.detector.request_permission().await);
    assert_eq!(h.sensor.permission_requests(), 0);
}

#[tokio::test]
async fn test_grant_starts_listening_when_enabled() {
    let h = harness(ManualMotionSensor::new(true, true));
    let notified = Arc::new(AtomicUsize::new(0));
    let n = notified.clone();
    h.detector.on_state_change(move |state| {
        if state.has_permission {
            n.fetch_add(1, Ordering::SeqCst);
        }
    });

    h.detector.set_enabled(true);
    assert!(!h.detector.state().has_permission);
    assert!(!h.detector.is_listening());

    assert!(h.detector.request_permission().await);
    assert_eq!(h.sensor.permission_requests(), 1);
    assert!(h.detector.is_listening());
    assert_eq!(notified.load(Ordering::SeqCst), 1);

    // Already granted: no second platform prompt
    assert!(h.detector.request_permission().await);
    assert_eq!(h.sensor.permission_requests(), 1);

    h.sensor.emit(strong());
    assert_eq!(h.shakes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_grant_while_disabled_does_not_listen() {
    let h = harness(ManualMotionSensor::new(true, true));
    assert!(h.detector.request_permission().await);
    assert!(!h.detector.is_listening());

    h.detector.set_enabled(true);
    assert!(h.detector.is_listening());
}

#[tokio::test]
async fn test_permission_denied() {
    let h = harness(ManualMotionSensor::new(true, true));
    h.sensor.set_grant_outcome(PermissionOutcome::Denied);
    h.detector.set_enabled(true);

    assert!(!h.detector.request_permission().await);
    assert!(!h.detector.state().has_permission);
    assert!(!h.detector.is_listening());
}

#[tokio::test]
async fn test_unsupported_sensor() {
    let h = harness(ManualMotionSensor::new(false, true));
    assert!(!h.detector.state().supported);

    assert!(!h.detector.request_permission().await);
    assert_eq!(h.sensor.permission_requests(), 0);

    h.detector.set_enabled(true);
    assert!(!h.detector.is_listening());
}

#[test]
fn test_panicking_listener_is_isolated() {
    let h = harness(ManualMotionSensor::supported());
    h.detector.on_shake(|_| panic!("listener failure"));
    let after = Arc::new(AtomicUsize::new(0));
    let a = after.clone();
    h.detector.on_shake(move |_| {
        a.fetch_add(1, Ordering::SeqCst);
    });
    h.detector.set_enabled(true);

    h.sensor.emit(strong());

    assert_eq!(h.shakes.load(Ordering::SeqCst), 1);
    assert_eq!(after.load(Ordering::SeqCst), 1);
    assert!(h.detector.state().last_shake_time.is_some());
}

#[test]
fn test_remove_listener_removes_only_that_one() {
    let h = harness(ManualMotionSensor::supported());
    let other = Arc::new(AtomicUsize::new(0));
    let o = other.clone();
    let handle = h.detector.on_shake(move |_| {
        o.fetch_add(1, Ordering::SeqCst);
    });
    h.detector.set_enabled(true);

    assert!(h.detector.remove_shake_listener(handle));
    assert!(!h.detector.remove_shake_listener(handle));
    h.sensor.emit(strong());

    assert_eq!(other.load(Ordering::SeqCst), 0);
    assert_eq!(h.shakes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_samples_ignored_unless_enabled_with_permission() {
    let h = harness(ManualMotionSensor::new(true, true));

    h.detector.handle_sample(strong());
    h.detector.set_enabled(true);
    h.detector.handle_sample(strong());
    assert_eq!(h.shakes.load(Ordering::SeqCst), 0);
    assert!(h.detector.state().last_shake_time.is_none());

    assert!(h.detector.request_permission().await);
    h.detector.handle_sample(strong());
    assert_eq!(h.shakes.load(Ordering::SeqCst), 1);

    h.clock.advance_ms(5000);
    h.detector.set_enabled(false);
    h.detector.handle_sample(strong());
    assert_eq!(h.shakes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_dispose_is_terminal() {
    let h = harness(ManualMotionSensor::supported());
    h.detector.set_enabled(true);

    h.detector.dispose();
    h.detector.dispose();

    assert_eq!(h.sensor.listener_count(), 0);
    h.detector.set_enabled(true);
    assert_eq!(h.sensor.listener_count(), 0);

    h.detector.handle_sample(strong());
    assert_eq!(h.shakes.load(Ordering::SeqCst), 0);
}
