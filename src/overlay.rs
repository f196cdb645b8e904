use crate::capture::CaptureSource;
use crate::config::{SharedEffectConfig, TuningConfig};
use crate::error::Result;
use crate::input::Key;
use crate::monitor::{resolve_refresh_rate, MonitorGeometry, MonitorInfo};
use crate::render_loop::{FrameStats, RenderContext, RenderLoop};
use crate::window::OverlayBackend;
use crate::{log_error, log_info, log_warn};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Starts and stops the render thread and exposes what a control surface
/// needs: the shared config, the running flag, the controls-visible flag and
/// frame statistics.
pub struct OverlayManager {
    config: SharedEffectConfig,
    tuning: TuningConfig,
    running: Arc<Mutex<bool>>,
    render_thread: Mutex<Option<thread::JoinHandle<()>>>,
    last_monitor: Mutex<Option<(usize, MonitorInfo)>>,
    controls_visible: Arc<AtomicBool>,
    frame_stats: Arc<Mutex<Option<FrameStats>>>,
    key_sender: Sender<Key>,
    key_receiver: Receiver<Key>,
}

impl OverlayManager {
    pub fn new(config: SharedEffectConfig, tuning: TuningConfig) -> Self {
        let (key_sender, key_receiver) = crossbeam_channel::unbounded();
        Self {
            config,
            tuning,
            running: Arc::new(Mutex::new(false)),
            render_thread: Mutex::new(None),
            last_monitor: Mutex::new(None),
            controls_visible: Arc::new(AtomicBool::new(true)),
            frame_stats: Arc::new(Mutex::new(None)),
            key_sender,
            key_receiver,
        }
    }

    pub fn config(&self) -> &SharedEffectConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        *self.running.lock()
    }

    pub fn controls_visible(&self) -> bool {
        self.controls_visible.load(Ordering::SeqCst)
    }

    pub fn frame_stats(&self) -> Option<FrameStats> {
        *self.frame_stats.lock()
    }

    /// Queues a key for the render thread, as if pressed on the overlay.
    pub fn send_key(&self, key: Key) {
        let _ = self.key_sender.send(key);
    }

    pub fn toggle(&self) {
        if self.is_running() {
            self.stop();
        } else if let Some((index, info)) = *self.last_monitor.lock() {
            self.start(index, info);
        } else {
            log_warn!("Overlay toggle ignored: no monitor selected yet");
        }
    }

    /// Starts the platform backend on the given monitor.
    pub fn start(&self, monitor_index: usize, monitor: MonitorInfo) {
        let geometry = monitor.geometry;
        let refresh_rate = resolve_refresh_rate(monitor.refresh_rate, self.tuning.refresh_rate_fallback);
        if monitor.refresh_rate != Some(refresh_rate) {
            log_warn!(
                "Refresh rate unavailable for monitor {}, using {:.0} Hz",
                monitor_index,
                refresh_rate
            );
        }

        *self.last_monitor.lock() = Some((monitor_index, monitor));
        self.start_with(geometry, refresh_rate, move || platform_parts(monitor_index, geometry));
        log_info!(
            "Overlay started (Monitor {}, {}x{} at {:.0} Hz)",
            monitor_index,
            geometry.width,
            geometry.height,
            refresh_rate
        );
    }

    /// Starts the render thread with a caller-supplied backend and capture
    /// source. Both are built on the render thread, since native windows
    /// belong to the thread that created them.
    pub fn start_with<B, C, F>(&self, geometry: MonitorGeometry, refresh_rate: f32, factory: F)
    where
        B: OverlayBackend + 'static,
        C: CaptureSource + 'static,
        F: FnOnce() -> Result<(B, C)> + Send + 'static,
    {
        if self.is_running() {
            return;
        }

        // a loop that exited on its own still needs joining; its last act is
        // locking the running flag, so no guard may be held here
        let finished = self.render_thread.lock().take();
        if let Some(handle) = finished {
            if handle.join().is_err() {
                log_error!("Render thread panicked");
            }
        }

        let mut running = self.running.lock();
        if *running {
            return;
        }
        while self.key_receiver.try_recv().is_ok() {}
        *self.frame_stats.lock() = None;

        let context = RenderContext {
            geometry,
            refresh_rate,
            config: self.config.clone(),
            tuning: self.tuning.clone(),
            running: Arc::clone(&self.running),
            controls_visible: Arc::clone(&self.controls_visible),
            commands: self.key_receiver.clone(),
            frame_stats: Arc::clone(&self.frame_stats),
        };
        let running_flag = Arc::clone(&self.running);
        *running = true;

        let handle = thread::spawn(move || {
            log_info!("Render thread started");

            let result = factory().and_then(|(backend, capture)| RenderLoop::new(backend, capture, context));
            match result {
                Ok(render) => render.run(),
                Err(e) => log_error!("Overlay error: {}", e),
            }

            *running_flag.lock() = false;
            log_info!("Render thread ended");
        });

        *self.render_thread.lock() = Some(handle);
    }

    /// Signals the loop to exit and blocks until the render thread is gone.
    pub fn stop(&self) {
        let was_running = std::mem::replace(&mut *self.running.lock(), false);

        if let Some(handle) = self.render_thread.lock().take() {
            if handle.join().is_err() {
                log_error!("Render thread panicked");
            }
        }

        if was_running {
            match *self.last_monitor.lock() {
                Some((idx, _)) => log_info!("Overlay stopped (Monitor {})", idx),
                None => log_info!("Overlay stopped"),
            }
        }
    }
}

impl Drop for OverlayManager {
    fn drop(&mut self) {
        self.stop();
    }
}

type PlatformParts = (Box<dyn OverlayBackend>, Box<dyn CaptureSource>);

#[cfg(windows)]
fn platform_parts(monitor_index: usize, _geometry: MonitorGeometry) -> Result<PlatformParts> {
    use crate::capture::{DuplicationCapture, UnavailableCapture};
    use crate::window::Win32Overlay;

    let capture: Box<dyn CaptureSource> = match DuplicationCapture::new(monitor_index) {
        Ok(capture) => Box::new(capture),
        Err(e) => {
            log_warn!("Desktop duplication unavailable, overlay will present nothing: {}", e);
            Box::new(UnavailableCapture::new(e.to_string()))
        }
    };
    Ok((Box::new(Win32Overlay::new()), capture))
}

#[cfg(all(not(windows), feature = "desktop"))]
fn platform_parts(monitor_index: usize, geometry: MonitorGeometry) -> Result<PlatformParts> {
    use crate::capture::{ScreenCapture, UnavailableCapture};
    use crate::window::MinifbOverlay;

    let capture: Box<dyn CaptureSource> = match ScreenCapture::new(monitor_index, geometry) {
        Ok(capture) => Box::new(capture),
        Err(e) => {
            log_warn!("Screen capture unavailable, overlay will present nothing: {}", e);
            Box::new(UnavailableCapture::new(e.to_string()))
        }
    };
    Ok((Box::new(MinifbOverlay::new()), capture))
}

#[cfg(all(not(windows), not(feature = "desktop")))]
fn platform_parts(_monitor_index: usize, _geometry: MonitorGeometry) -> Result<PlatformParts> {
    Err(crate::error::CrtError::Window(
        "No overlay backend in this build; enable the `desktop` feature".to_string(),
    ))
}
