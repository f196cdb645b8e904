use crate::capture::CaptureSource;
use crate::config::{SharedEffectConfig, TuningConfig};
use crate::effects::EffectsPipeline;
use crate::error::CrtError;
use crate::feedback::{Classification, FeedbackGuard, GuardSettings};
use crate::input::{apply_command, command_for, Dispatch, Key};
use crate::monitor::MonitorGeometry;
use crate::window::OverlayBackend;
use crate::{log_error, log_info, log_warn};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Frames kept for the rolling average.
const STATS_WINDOW: usize = 60;
const STATS_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCounters {
    pub normal: u64,
    pub feedback: u64,
    pub bootstrap: u64,
    pub capture_failures: u64,
    pub filter_failures: u64,
    pub present_failures: u64,
}

impl FrameCounters {
    fn record(&mut self, classification: Classification) {
        match classification {
            Classification::Normal => self.normal += 1,
            Classification::Feedback => self.feedback += 1,
            Classification::Bootstrap => self.bootstrap += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameStats {
    pub fps: f32,
    pub frame_time_ms: f32,
    pub counters: FrameCounters,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Presented {
        classification: Classification,
        /// Retry bound exceeded: wait this long before the next tick.
        pause: Option<Duration>,
    },
    CaptureFailed,
    FilterFailed,
    PresentFailed,
    Exit,
}

/// Everything the render thread shares with the outside world.
pub struct RenderContext {
    pub geometry: MonitorGeometry,
    pub refresh_rate: f32,
    pub config: SharedEffectConfig,
    pub tuning: TuningConfig,
    pub running: Arc<Mutex<bool>>,
    pub controls_visible: Arc<AtomicBool>,
    /// Keys injected by a control surface, dispatched like window keys.
    pub commands: Receiver<Key>,
    pub frame_stats: Arc<Mutex<Option<FrameStats>>>,
}

impl RenderContext {
    /// Context with its own flags and no command channel.
    pub fn new(geometry: MonitorGeometry, refresh_rate: f32, config: SharedEffectConfig, tuning: TuningConfig) -> Self {
        Self {
            geometry,
            refresh_rate,
            config,
            tuning,
            running: Arc::new(Mutex::new(true)),
            controls_visible: Arc::new(AtomicBool::new(true)),
            commands: crossbeam_channel::never(),
            frame_stats: Arc::new(Mutex::new(None)),
        }
    }
}

/// Hides the overlay for one capture. Restores on [`restore`](Self::restore),
/// or through `ensure_restored` if the capture unwinds first.
struct HideBracket<'a, B: OverlayBackend> {
    backend: &'a mut B,
    hidden: bool,
    open: bool,
}

impl<'a, B: OverlayBackend> HideBracket<'a, B> {
    fn hide(backend: &'a mut B) -> Self {
        let hidden = backend.hide();
        Self {
            backend,
            hidden,
            open: true,
        }
    }

    fn restore(&mut self) {
        self.backend.restore();
        self.open = false;
    }
}

impl<B: OverlayBackend> Drop for HideBracket<'_, B> {
    fn drop(&mut self) {
        if self.open {
            self.backend.ensure_restored();
        }
    }
}

/// Per-tick orchestration: input, hide, capture, restore, guard, present.
///
/// Owns the backend, the capture source and the guard; nothing here is
/// touched by another thread except through [`RenderContext`].
pub struct RenderLoop<B: OverlayBackend, C: CaptureSource> {
    backend: B,
    capture: C,
    pipeline: EffectsPipeline,
    guard: FeedbackGuard,
    context: RenderContext,
    counters: FrameCounters,
    error_count: u32,
    last_error_log: Option<Instant>,
}

impl<B: OverlayBackend, C: CaptureSource> RenderLoop<B, C> {
    /// Creates the overlay window; fails only if the backend cannot.
    pub fn new(mut backend: B, capture: C, context: RenderContext) -> crate::error::Result<Self> {
        backend.setup(context.geometry)?;
        let (width, height) = context.geometry.size();

        Ok(Self {
            backend,
            capture,
            pipeline: EffectsPipeline::new(width, height),
            guard: FeedbackGuard::new(GuardSettings::from(&context.tuning)),
            context,
            counters: FrameCounters::default(),
            error_count: 0,
            last_error_log: None,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn capture(&self) -> &C {
        &self.capture
    }

    pub fn guard(&self) -> &FeedbackGuard {
        &self.guard
    }

    pub fn counters(&self) -> FrameCounters {
        self.counters
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn tick(&mut self) -> TickOutcome {
        if self.dispatch_input() == Dispatch::Exit {
            *self.context.running.lock() = false;
            return TickOutcome::Exit;
        }

        // one snapshot per tick: the pipeline never sees a half-applied edit
        let config = self.context.config.snapshot();

        let mut bracket = HideBracket::hide(&mut self.backend);
        if bracket.hidden {
            let settle = self.context.tuning.capture_settle_delay();
            if !settle.is_zero() {
                spin_sleep::sleep(settle);
            }
        }
        let captured = self.capture.grab();
        bracket.restore();
        drop(bracket);

        let frame = match captured {
            Ok(frame) => frame,
            Err(e) => {
                self.backend.ensure_restored();
                self.counters.capture_failures += 1;
                self.report_error("Capture", &e);
                return TickOutcome::CaptureFailed;
            }
        };

        let pipeline = &self.pipeline;
        let backend = &mut self.backend;
        let processed = self
            .guard
            .process(frame, |f| pipeline.apply(f, &config))
            .map(|outcome| (outcome.classification, outcome.pause, backend.present(outcome.frame)));

        let (classification, pause, presented) = match processed {
            Ok(processed) => processed,
            Err(e) => {
                self.counters.filter_failures += 1;
                self.report_error("Filter", &e);
                return TickOutcome::FilterFailed;
            }
        };

        self.counters.record(classification);
        if let Err(e) = presented {
            self.backend.ensure_restored();
            self.counters.present_failures += 1;
            self.report_error("Present", &e);
            return TickOutcome::PresentFailed;
        }

        TickOutcome::Presented { classification, pause }
    }

    fn dispatch_input(&mut self) -> Dispatch {
        let keys: Vec<Key> = self
            .backend
            .poll_keys()
            .into_iter()
            .chain(self.context.commands.try_iter())
            .collect();

        for key in keys {
            let dispatch = apply_command(
                command_for(key),
                &self.context.config,
                &self.context.tuning.steps,
                &self.context.controls_visible,
            );
            if dispatch == Dispatch::Exit {
                return Dispatch::Exit;
            }
        }
        Dispatch::Continue
    }

    fn report_error(&mut self, stage: &str, error: &CrtError) {
        self.error_count += 1;
        // at most one line per second
        let due = self
            .last_error_log
            .map_or(true, |last| last.elapsed() >= Duration::from_secs(1));
        if due {
            log_error!("{} error (count: {}): {}", stage, self.error_count, error);
            self.last_error_log = Some(Instant::now());
        }
    }

    /// Runs until the running flag clears or an exit key arrives, pacing
    /// ticks to the refresh rate. Always leaves the window restored and
    /// torn down.
    pub fn run(mut self) {
        let refresh_rate = if self.context.refresh_rate > 0.0 {
            self.context.refresh_rate
        } else {
            self.context.tuning.refresh_rate_fallback
        };
        let frame_interval = Duration::from_secs_f32(1.0 / refresh_rate);
        log_info!("Render loop started at {:.1} Hz", refresh_rate);

        // (render_time, total_time) per frame
        let mut frame_times: Vec<(f32, f32)> = Vec::with_capacity(STATS_WINDOW + 1);
        let mut last_stats_update = Instant::now();
        let mut last_frame_time = Instant::now();

        loop {
            if !*self.context.running.lock() {
                log_info!("Render loop stop requested");
                break;
            }

            let frame_start = Instant::now();
            let outcome = self.tick();
            let render_time_ms = frame_start.elapsed().as_secs_f32() * 1000.0;

            match outcome {
                TickOutcome::Exit => break,
                TickOutcome::Presented { pause: Some(pause), .. } => {
                    log_warn!("Sustained feedback, pausing {} ms", pause.as_millis());
                    spin_sleep::sleep(pause);
                }
                _ => {}
            }

            let elapsed = last_frame_time.elapsed();
            if elapsed < frame_interval {
                spin_sleep::sleep(frame_interval - elapsed);
            }

            let now = Instant::now();
            let total_frame_time_ms = now.duration_since(last_frame_time).as_secs_f32() * 1000.0;
            last_frame_time = now;
            frame_times.push((render_time_ms, total_frame_time_ms));

            if last_stats_update.elapsed() >= STATS_INTERVAL {
                self.publish_stats(&frame_times);
                if frame_times.len() > STATS_WINDOW {
                    frame_times.drain(0..frame_times.len() - STATS_WINDOW);
                }
                last_stats_update = now;
            }
        }

        self.publish_stats(&frame_times);
        if self.error_count > 0 {
            log_warn!("Exiting with {} render errors encountered", self.error_count);
        }
        log_info!(
            "Frames: {} normal, {} feedback, {} bootstrap, {} capture failures",
            self.counters.normal,
            self.counters.feedback,
            self.counters.bootstrap,
            self.counters.capture_failures
        );

        self.backend.ensure_restored();
        self.backend.teardown();
        *self.context.running.lock() = false;
    }

    fn publish_stats(&self, frame_times: &[(f32, f32)]) {
        let (fps, frame_time_ms) = if frame_times.is_empty() {
            (0.0, 0.0)
        } else {
            let (sum_render, sum_total) = frame_times
                .iter()
                .fold((0.0, 0.0), |(r, t), &(render, total)| (r + render, t + total));
            let avg_render = sum_render / frame_times.len() as f32;
            let avg_total = sum_total / frame_times.len() as f32;
            let fps = if avg_total > 0.0 { 1000.0 / avg_total } else { 0.0 };
            (fps, avg_render)
        };

        *self.context.frame_stats.lock() = Some(FrameStats {
            fps,
            frame_time_ms,
            counters: self.counters,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ScriptedCapture;
    use crate::config::EffectConfig;
    use crate::raster::RasterBuffer;
    use crate::window::{HeadlessOverlay, OverlayEvent, Visibility};

    fn quick_tuning() -> TuningConfig {
        TuningConfig {
            capture_settle_delay_ms: 0,
            feedback_retry_delay_ms: 0,
            ..TuningConfig::default()
        }
    }

    fn render_loop(capture: ScriptedCapture) -> (RenderLoop<HeadlessOverlay, ScriptedCapture>, HeadlessOverlay) {
        let recorder = HeadlessOverlay::new();
        let context = RenderContext::new(
            MonitorGeometry::new(0, 0, 4, 4),
            60.0,
            SharedEffectConfig::new(EffectConfig::passthrough()),
            quick_tuning(),
        );
        let render = RenderLoop::new(recorder.clone(), capture, context).unwrap();
        (render, recorder)
    }

    #[test]
    fn restore_follows_hide_even_on_capture_failure() {
        let mut capture = ScriptedCapture::new();
        capture.push_failure("device lost");
        let (mut render, recorder) = render_loop(capture);

        assert_eq!(render.tick(), TickOutcome::CaptureFailed);
        let events = recorder.events();
        assert_eq!(
            &events[1..],
            &[OverlayEvent::Hide, OverlayEvent::Restore, OverlayEvent::EnsureRestored]
        );
        assert_eq!(recorder.presented_count(), 0);
        assert_eq!(render.counters().capture_failures, 1);
        assert_eq!(render.error_count(), 1);
    }

    #[test]
    fn failed_hide_still_captures_and_restores() {
        let (mut render, recorder) = render_loop(ScriptedCapture::frames([RasterBuffer::new(4, 4)]));
        recorder.set_hide_succeeds(false);

        assert!(matches!(render.tick(), TickOutcome::Presented { .. }));
        assert_eq!(render.capture().grabs(), 1);
        assert!(recorder.events().contains(&OverlayEvent::Restore));
    }

    #[test]
    fn present_failure_forces_restore() {
        let (mut render, recorder) = render_loop(ScriptedCapture::frames([RasterBuffer::new(4, 4)]));
        recorder.set_present_fails(true);

        assert_eq!(render.tick(), TickOutcome::PresentFailed);
        assert_eq!(recorder.events().last(), Some(&OverlayEvent::EnsureRestored));
        assert_eq!(render.counters().present_failures, 1);
    }

    #[test]
    fn keys_are_dispatched_before_capture() {
        let (mut render, recorder) = render_loop(ScriptedCapture::frames([RasterBuffer::new(4, 4)]));
        recorder.press(Key::Digit2);

        render.tick();
        let scanlines = render.context.config.read(|c| c.scanline_intensity);
        assert!((scanlines - 0.05).abs() < 1e-6);
    }

    #[test]
    fn escape_stops_without_capturing() {
        let (mut render, recorder) = render_loop(ScriptedCapture::frames([RasterBuffer::new(4, 4)]));
        recorder.press(Key::Escape);

        assert_eq!(render.tick(), TickOutcome::Exit);
        assert_eq!(render.capture().grabs(), 0);
        assert!(!*render.context.running.lock());
    }

    struct PanickingCapture;

    impl CaptureSource for PanickingCapture {
        fn grab(&mut self) -> crate::error::Result<RasterBuffer> {
            panic!("capture driver crashed");
        }
    }

    #[test]
    fn unwinding_capture_still_restores_window() {
        let recorder = HeadlessOverlay::new();
        let context = RenderContext::new(
            MonitorGeometry::new(0, 0, 4, 4),
            60.0,
            SharedEffectConfig::new(EffectConfig::passthrough()),
            quick_tuning(),
        );
        let mut render = RenderLoop::new(recorder.clone(), PanickingCapture, context).unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| render.tick()));
        assert!(result.is_err());
        assert_eq!(
            &recorder.events()[1..],
            &[OverlayEvent::Hide, OverlayEvent::EnsureRestored]
        );
        assert_eq!(recorder.visibility(), Visibility::Shown);
    }

    #[test]
    fn run_exits_restored_and_torn_down() {
        let (render, recorder) = render_loop(ScriptedCapture::frames([RasterBuffer::new(4, 4)]));
        recorder.press(Key::Escape);
        let stats = Arc::clone(&render.context.frame_stats);

        render.run();
        let events = recorder.events();
        assert_eq!(
            &events[events.len() - 2..],
            &[OverlayEvent::EnsureRestored, OverlayEvent::Teardown]
        );
        assert!(stats.lock().is_some());
    }
}
