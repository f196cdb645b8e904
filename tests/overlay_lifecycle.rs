use crtveil::capture::ScriptedCapture;
use crtveil::config::{EffectConfig, SharedEffectConfig, TuningConfig};
use crtveil::error::CrtError;
use crtveil::input::Key;
use crtveil::monitor::MonitorGeometry;
use crtveil::raster::RasterBuffer;
use crtveil::window::{HeadlessOverlay, OverlayBackend, OverlayEvent, OverlayWindowHandle, Visibility};
use crtveil::OverlayManager;
use std::time::{Duration, Instant};

const GEOMETRY: MonitorGeometry = MonitorGeometry {
    left: 0,
    top: 0,
    width: 8,
    height: 8,
};

fn manager() -> OverlayManager {
    let tuning = TuningConfig {
        capture_settle_delay_ms: 0,
        feedback_retry_delay_ms: 0,
        ..TuningConfig::default()
    };
    OverlayManager::new(SharedEffectConfig::new(EffectConfig::default()), tuning)
}

fn changing_frames() -> ScriptedCapture {
    ScriptedCapture::frames((0..8u8).map(|i| RasterBuffer::filled(8, 8, [i * 30, 0, 255 - i * 30])))
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn start_headless(manager: &OverlayManager) -> HeadlessOverlay {
    let recorder = HeadlessOverlay::new();
    let backend = recorder.clone();
    manager.start_with(GEOMETRY, 240.0, move || Ok((backend, changing_frames())));
    recorder
}

/// Headless backend whose teardown lingers, so the render thread is still
/// alive after it has cleared the running flag.
struct SlowTeardown(HeadlessOverlay);

impl OverlayBackend for SlowTeardown {
    fn setup(&mut self, geometry: MonitorGeometry) -> crtveil::Result<OverlayWindowHandle> {
        self.0.setup(geometry)
    }

    fn hide(&mut self) -> bool {
        self.0.hide()
    }

    fn restore(&mut self) {
        self.0.restore()
    }

    fn ensure_restored(&mut self) {
        self.0.ensure_restored()
    }

    fn present(&mut self, frame: &RasterBuffer) -> crtveil::Result<()> {
        self.0.present(frame)
    }

    fn poll_keys(&mut self) -> Vec<Key> {
        self.0.poll_keys()
    }

    fn visibility(&self) -> Visibility {
        self.0.visibility()
    }

    fn teardown(&mut self) {
        std::thread::sleep(Duration::from_millis(300));
        self.0.teardown()
    }
}

#[test]
fn stop_joins_thread_and_leaves_window_restored() {
    let manager = manager();
    let recorder = start_headless(&manager);
    assert!(manager.is_running());
    assert!(wait_until(|| recorder.presented_count() >= 2));

    manager.stop();
    assert!(!manager.is_running());

    let events = recorder.events();
    assert_eq!(events.first(), Some(&OverlayEvent::Setup(GEOMETRY)));
    assert_eq!(
        &events[events.len() - 2..],
        &[OverlayEvent::EnsureRestored, OverlayEvent::Teardown]
    );
    assert_eq!(recorder.visibility(), Visibility::Absent);

    let stats = manager.frame_stats().expect("stats published");
    assert!(stats.counters.normal >= 1);
}

#[test]
fn escape_from_control_surface_clears_running_flag() {
    let manager = manager();
    let recorder = start_headless(&manager);
    assert!(wait_until(|| recorder.presented_count() >= 1));

    manager.send_key(Key::Escape);
    assert!(wait_until(|| !manager.is_running()));
    manager.stop();
    assert_eq!(recorder.events().last(), Some(&OverlayEvent::Teardown));
}

#[test]
fn window_keys_adjust_shared_config() {
    let manager = manager();
    let before = manager.config().read(|c| c.scanline_intensity);
    let recorder = start_headless(&manager);

    recorder.press(Key::Digit2);
    recorder.press(Key::Digit0);
    assert!(wait_until(|| !manager.controls_visible()));
    let after = manager.config().read(|c| c.scanline_intensity);
    assert!((after - before - 0.05).abs() < 1e-6);

    manager.stop();
}

#[test]
fn setup_failure_ends_session() {
    let manager = manager();
    manager.start_with(GEOMETRY, 60.0, || -> crtveil::Result<(HeadlessOverlay, ScriptedCapture)> {
        Err(CrtError::Window("no display".to_string()))
    });

    assert!(wait_until(|| !manager.is_running()));
    manager.stop();
    assert!(manager.frame_stats().is_none());
}

#[test]
fn second_start_while_running_is_ignored() {
    let manager = manager();
    let recorder = start_headless(&manager);
    let other = start_headless(&manager);
    assert!(wait_until(|| recorder.presented_count() >= 1));

    manager.stop();
    assert!(other.events().is_empty());
}

#[test]
fn session_can_restart_after_stop() {
    let manager = manager();
    let first = start_headless(&manager);
    assert!(wait_until(|| first.presented_count() >= 1));
    manager.stop();

    let second = start_headless(&manager);
    assert!(manager.is_running());
    assert!(wait_until(|| second.presented_count() >= 1));
    manager.stop();
    assert!(!manager.is_running());
}

#[test]
fn restart_right_after_escape_exit_does_not_hang() {
    let manager = std::sync::Arc::new(manager());
    let first = HeadlessOverlay::new();
    let backend = SlowTeardown(first.clone());
    manager.start_with(GEOMETRY, 240.0, move || Ok((backend, changing_frames())));
    assert!(wait_until(|| first.presented_count() >= 1));

    manager.send_key(Key::Escape);
    assert!(wait_until(|| !manager.is_running()));

    // the old thread is still inside its slow teardown here
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let restarter = std::sync::Arc::clone(&manager);
    let second = HeadlessOverlay::new();
    let second_backend = second.clone();
    std::thread::spawn(move || {
        restarter.start_with(GEOMETRY, 240.0, move || Ok((second_backend, changing_frames())));
        let _ = done_tx.send(());
    });

    assert!(
        done_rx.recv_timeout(Duration::from_secs(5)).is_ok(),
        "restart blocked on the exiting render thread"
    );
    assert_eq!(first.events().last(), Some(&OverlayEvent::Teardown));
    assert!(wait_until(|| second.presented_count() >= 1));
    manager.stop();
}
