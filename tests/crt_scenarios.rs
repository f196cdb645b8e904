use crtveil::capture::ScriptedCapture;
use crtveil::config::{EffectConfig, SharedEffectConfig, TuningConfig};
use crtveil::effects::EffectsPipeline;
use crtveil::feedback::Classification;
use crtveil::monitor::MonitorGeometry;
use crtveil::raster::RasterBuffer;
use crtveil::render_loop::{RenderContext, RenderLoop, TickOutcome};
use crtveil::window::{HeadlessOverlay, OverlayEvent};

fn quick_tuning() -> TuningConfig {
    TuningConfig {
        capture_settle_delay_ms: 0,
        feedback_retry_delay_ms: 0,
        ..TuningConfig::default()
    }
}

fn checker(width: u32, height: u32) -> RasterBuffer {
    let mut buf = RasterBuffer::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let v = if (x + y) % 2 == 0 { 200 } else { 40 };
            buf.set_pixel(x, y, [v, v / 2, 255 - v]);
        }
    }
    buf
}

#[test]
fn full_scanlines_blacken_even_rows_of_white_frame() {
    let white = RasterBuffer::filled(4, 4, [255, 255, 255]);
    let config = EffectConfig {
        scanline_intensity: 1.0,
        ..EffectConfig::passthrough()
    };

    let out = EffectsPipeline::new(4, 4).apply(&white, &config).expect("apply");

    for y in 0..4 {
        let expected = if y % 2 == 0 { [0, 0, 0] } else { [255, 255, 255] };
        for x in 0..4 {
            assert_eq!(out.pixel(x, y), expected, "pixel ({}, {})", x, y);
        }
    }
}

#[test]
fn repeated_capture_presents_first_output_again() {
    let frame = checker(8, 8);
    let recorder = HeadlessOverlay::new();
    let context = RenderContext::new(
        MonitorGeometry::new(0, 0, 8, 8),
        60.0,
        SharedEffectConfig::new(EffectConfig::passthrough()),
        quick_tuning(),
    );
    let mut render = RenderLoop::new(recorder.clone(), ScriptedCapture::frames([frame.clone(), frame]), context)
        .expect("render loop");

    assert_eq!(
        render.tick(),
        TickOutcome::Presented {
            classification: Classification::Normal,
            pause: None
        }
    );
    assert_eq!(
        render.tick(),
        TickOutcome::Presented {
            classification: Classification::Feedback,
            pause: None
        }
    );

    let presented = recorder.presented();
    assert_eq!(presented.len(), 2);
    assert_eq!(presented[1], presented[0]);
    assert_eq!(render.guard().history().len(), 1);
    assert_eq!(render.counters().feedback, 1);
}

/// Red ramps along x, green along y, blue along the diagonal.
fn gradient(width: u32, height: u32) -> RasterBuffer {
    let mut buf = RasterBuffer::new(width, height);
    for y in 0..height {
        for x in 0..width {
            buf.set_pixel(x, y, [(x * 4) as u8, (y * 4) as u8, (255 - (x + y) * 2) as u8]);
        }
    }
    buf
}

#[test]
fn performance_mode_stays_close_to_full_resolution() {
    let input = gradient(64, 64);
    let pipeline = EffectsPipeline::new(64, 64);
    let full = EffectConfig {
        scanline_intensity: 0.1,
        ..EffectConfig::passthrough()
    };
    let fast = EffectConfig {
        performance_mode: true,
        ..full
    };

    let full_out = pipeline.apply(&input, &full).expect("full");
    let fast_out = pipeline.apply(&input, &fast).expect("fast");

    assert_eq!(full_out.dimensions(), fast_out.dimensions());
    // at most the scanline phase differs: 10% on half the rows
    let diff = full_out.mean_abs_diff(&fast_out).expect("diff");
    assert!(diff < 9.0, "mean difference {} too large", diff);

    // the ramps keep their orientation through the round trip
    let red: Vec<u8> = [10, 30, 50].iter().map(|&x| fast_out.pixel(x, 21)[0]).collect();
    let green: Vec<u8> = [10, 30, 50].iter().map(|&y| fast_out.pixel(21, y)[1]).collect();
    assert!(red[0] < red[1] && red[1] < red[2], "red {:?}", red);
    assert!(green[0] < green[1] && green[1] < green[2], "green {:?}", green);
}

#[test]
fn every_setting_preserves_dimensions() {
    let pipeline = EffectsPipeline::new(7, 5);
    let input = checker(7, 5);
    for &performance_mode in &[false, true] {
        for &strength in &[0.0f32, 0.1, 0.5] {
            let config = EffectConfig {
                scanline_intensity: strength,
                curvature: strength,
                vignette_intensity: strength,
                chromatic_aberration: strength * 10.0,
                performance_mode,
            };
            let out = pipeline.apply(&input, &config).expect("apply");
            assert_eq!(out.dimensions(), (7, 5), "{:?}", config);
        }
    }
}

#[test]
fn first_tick_filters_even_without_history() {
    let recorder = HeadlessOverlay::new();
    let context = RenderContext::new(
        MonitorGeometry::new(0, 0, 4, 4),
        60.0,
        SharedEffectConfig::new(EffectConfig {
            scanline_intensity: 0.5,
            ..EffectConfig::passthrough()
        }),
        quick_tuning(),
    );
    let white = RasterBuffer::filled(4, 4, [255, 255, 255]);
    let mut render = RenderLoop::new(recorder.clone(), ScriptedCapture::frames([white]), context).expect("render loop");

    assert!(matches!(render.tick(), TickOutcome::Presented { .. }));
    let shown = recorder.last_presented().expect("frame presented");
    assert_eq!(shown.pixel(0, 0), [128, 128, 128]);
    assert_eq!(shown.pixel(0, 1), [255, 255, 255]);
}

#[test]
fn capture_failure_skips_tick_and_recovers() {
    let recorder = HeadlessOverlay::new();
    let context = RenderContext::new(
        MonitorGeometry::new(0, 0, 4, 4),
        60.0,
        SharedEffectConfig::new(EffectConfig::passthrough()),
        quick_tuning(),
    );
    let mut capture = ScriptedCapture::new();
    capture.push_failure("output lost");
    capture.push_frame(checker(4, 4));
    let mut render = RenderLoop::new(recorder.clone(), capture, context).expect("render loop");

    assert_eq!(render.tick(), TickOutcome::CaptureFailed);
    assert_eq!(recorder.presented_count(), 0);
    assert!(recorder.events().contains(&OverlayEvent::EnsureRestored));

    assert!(matches!(render.tick(), TickOutcome::Presented { .. }));
    assert_eq!(recorder.presented_count(), 1);
}

#[test]
fn sustained_feedback_requests_pause() {
    let recorder = HeadlessOverlay::new();
    let tuning = TuningConfig {
        max_feedback_retries: 2,
        feedback_retry_delay_ms: 100,
        ..quick_tuning()
    };
    let context = RenderContext::new(
        MonitorGeometry::new(0, 0, 4, 4),
        60.0,
        SharedEffectConfig::new(EffectConfig::passthrough()),
        tuning,
    );
    let mut render =
        RenderLoop::new(recorder, ScriptedCapture::frames([checker(4, 4)]), context).expect("render loop");

    render.tick();
    render.tick();
    render.tick();
    match render.tick() {
        TickOutcome::Presented {
            classification: Classification::Feedback,
            pause: Some(pause),
        } => assert_eq!(pause.as_millis(), 100),
        other => panic!("expected feedback pause, got {:?}", other),
    }
}
