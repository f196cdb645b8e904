// Overlay window controller.
//
// One `OverlayBackend` per platform owns a borderless, topmost,
// click-through window covering the target monitor. Hiding and restoring are
// best effort: a backend that cannot hide returns `false` and the feedback
// guard catches the self-capture.

#[cfg(all(not(windows), feature = "desktop"))]
pub mod minifb_window;
#[cfg(windows)]
pub mod win32;
#[cfg(all(target_os = "linux", feature = "desktop"))]
mod x11;

use crate::error::{CrtError, Result};
use crate::input::Key;
use crate::monitor::MonitorGeometry;
use crate::raster::RasterBuffer;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

#[cfg(all(not(windows), feature = "desktop"))]
pub use minifb_window::MinifbOverlay;
#[cfg(windows)]
pub use win32::Win32Overlay;

/// Whether this build carries a real overlay window for the current target.
pub const HAS_PLATFORM_BACKEND: bool = cfg!(any(windows, feature = "desktop"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Shown,
    Hidden,
    /// No window yet, or already torn down.
    Absent,
}

/// Opaque handle to the created window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayWindowHandle {
    /// Platform window id (HWND on Windows), 0 when there is none.
    pub raw: usize,
    pub geometry: MonitorGeometry,
}

pub trait OverlayBackend {
    fn setup(&mut self, geometry: MonitorGeometry) -> Result<OverlayWindowHandle>;

    /// Tries every hide mechanism in turn. `true` when the window is believed hidden.
    fn hide(&mut self) -> bool;

    /// Reverses [`hide`](Self::hide) and re-asserts topmost.
    fn restore(&mut self);

    /// Runs all restore mechanisms unconditionally; never fails.
    fn ensure_restored(&mut self);

    fn present(&mut self, frame: &RasterBuffer) -> Result<()>;

    /// Keys pressed since the last poll. Also pumps the platform message queue.
    fn poll_keys(&mut self) -> Vec<Key>;

    fn visibility(&self) -> Visibility;

    fn teardown(&mut self);
}

impl<T: OverlayBackend + ?Sized> OverlayBackend for Box<T> {
    fn setup(&mut self, geometry: MonitorGeometry) -> Result<OverlayWindowHandle> {
        (**self).setup(geometry)
    }

    fn hide(&mut self) -> bool {
        (**self).hide()
    }

    fn restore(&mut self) {
        (**self).restore()
    }

    fn ensure_restored(&mut self) {
        (**self).ensure_restored()
    }

    fn present(&mut self, frame: &RasterBuffer) -> Result<()> {
        (**self).present(frame)
    }

    fn poll_keys(&mut self) -> Vec<Key> {
        (**self).poll_keys()
    }

    fn visibility(&self) -> Visibility {
        (**self).visibility()
    }

    fn teardown(&mut self) {
        (**self).teardown()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayEvent {
    Setup(MonitorGeometry),
    Hide,
    Restore,
    EnsureRestored,
    Present { width: u32, height: u32 },
    Teardown,
}

#[derive(Debug)]
struct HeadlessState {
    events: Vec<OverlayEvent>,
    presented: Vec<RasterBuffer>,
    visibility: Visibility,
    hide_succeeds: bool,
    present_fails: bool,
    pending_keys: VecDeque<Key>,
}

/// Window-less backend that records every call.
///
/// Clones share state, so a test keeps one clone to inspect while the render
/// thread owns the other.
#[derive(Debug, Clone)]
pub struct HeadlessOverlay {
    state: Arc<Mutex<HeadlessState>>,
}

impl Default for HeadlessOverlay {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessOverlay {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HeadlessState {
                events: Vec::new(),
                presented: Vec::new(),
                visibility: Visibility::Absent,
                hide_succeeds: true,
                present_fails: false,
                pending_keys: VecDeque::new(),
            })),
        }
    }

    /// When `false`, `hide` reports failure and the window stays shown.
    pub fn set_hide_succeeds(&self, succeeds: bool) {
        self.state.lock().hide_succeeds = succeeds;
    }

    pub fn set_present_fails(&self, fails: bool) {
        self.state.lock().present_fails = fails;
    }

    /// Queues a key for the next `poll_keys`.
    pub fn press(&self, key: Key) {
        self.state.lock().pending_keys.push_back(key);
    }

    pub fn events(&self) -> Vec<OverlayEvent> {
        self.state.lock().events.clone()
    }

    pub fn presented(&self) -> Vec<RasterBuffer> {
        self.state.lock().presented.clone()
    }

    pub fn presented_count(&self) -> usize {
        self.state.lock().presented.len()
    }

    pub fn last_presented(&self) -> Option<RasterBuffer> {
        self.state.lock().presented.last().cloned()
    }
}

impl OverlayBackend for HeadlessOverlay {
    fn setup(&mut self, geometry: MonitorGeometry) -> Result<OverlayWindowHandle> {
        let mut state = self.state.lock();
        state.events.push(OverlayEvent::Setup(geometry));
        state.visibility = Visibility::Shown;
        Ok(OverlayWindowHandle { raw: 0, geometry })
    }

    fn hide(&mut self) -> bool {
        let mut state = self.state.lock();
        state.events.push(OverlayEvent::Hide);
        if state.hide_succeeds {
            state.visibility = Visibility::Hidden;
        }
        state.hide_succeeds
    }

    fn restore(&mut self) {
        let mut state = self.state.lock();
        state.events.push(OverlayEvent::Restore);
        state.visibility = Visibility::Shown;
    }

    fn ensure_restored(&mut self) {
        let mut state = self.state.lock();
        state.events.push(OverlayEvent::EnsureRestored);
        if state.visibility != Visibility::Absent {
            state.visibility = Visibility::Shown;
        }
    }

    fn present(&mut self, frame: &RasterBuffer) -> Result<()> {
        let mut state = self.state.lock();
        if state.present_fails {
            return Err(CrtError::Present("headless present disabled".to_string()));
        }
        state.events.push(OverlayEvent::Present {
            width: frame.width(),
            height: frame.height(),
        });
        state.presented.push(frame.clone());
        Ok(())
    }

    fn poll_keys(&mut self) -> Vec<Key> {
        self.state.lock().pending_keys.drain(..).collect()
    }

    fn visibility(&self) -> Visibility {
        self.state.lock().visibility
    }

    fn teardown(&mut self) {
        let mut state = self.state.lock();
        state.events.push(OverlayEvent::Teardown);
        state.visibility = Visibility::Absent;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_records_bracket_and_shares_state() {
        let recorder = HeadlessOverlay::new();
        let mut backend = recorder.clone();
        let geometry = MonitorGeometry::new(0, 0, 4, 4);

        backend.setup(geometry).unwrap();
        assert!(backend.hide());
        assert_eq!(recorder.visibility(), Visibility::Hidden);
        backend.restore();
        backend.present(&RasterBuffer::new(4, 4)).unwrap();

        assert_eq!(
            recorder.events(),
            vec![
                OverlayEvent::Setup(geometry),
                OverlayEvent::Hide,
                OverlayEvent::Restore,
                OverlayEvent::Present { width: 4, height: 4 },
            ]
        );
        assert_eq!(recorder.presented_count(), 1);
    }

    #[test]
    fn failed_hide_leaves_window_shown() {
        let mut backend = HeadlessOverlay::new();
        backend.setup(MonitorGeometry::new(0, 0, 1, 1)).unwrap();
        backend.set_hide_succeeds(false);
        assert!(!backend.hide());
        assert_eq!(backend.visibility(), Visibility::Shown);
    }

    #[test]
    fn present_failure_is_reported() {
        let mut backend = HeadlessOverlay::new();
        backend.set_present_fails(true);
        assert!(matches!(
            backend.present(&RasterBuffer::new(1, 1)),
            Err(CrtError::Present(_))
        ));
        assert_eq!(backend.presented_count(), 0);
    }

    #[test]
    fn pressed_keys_drain_once() {
        let mut backend = HeadlessOverlay::new();
        backend.press(Key::Digit2);
        backend.press(Key::P);
        assert_eq!(backend.poll_keys(), vec![Key::Digit2, Key::P]);
        assert!(backend.poll_keys().is_empty());
    }
}
