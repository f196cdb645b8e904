use anyhow::{Context, Result};
use crtveil::config::{EffectConfig, SharedEffectConfig, TuningConfig};
use crtveil::error::CrtError;
use crtveil::monitor::monitor_at;
use crtveil::window::HAS_PLATFORM_BACKEND;
use crtveil::{log_error, log_info, OverlayManager};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const USAGE: &str = "Usage: crtveil [--monitor N] [--config PATH] [--log-dir PATH] [--stream-logs]
               [--scanlines F] [--curvature F] [--vignette F] [--aberration F]
               [--no-performance-mode]";

#[derive(Debug, Default)]
struct CliArgs {
    monitor_index: usize,
    config_path: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    stream_logs: bool,
    scanlines: Option<f32>,
    curvature: Option<f32>,
    vignette: Option<f32>,
    aberration: Option<f32>,
    no_performance_mode: bool,
}

impl CliArgs {
    fn parse(args: &[String]) -> std::result::Result<Self, CrtError> {
        let mut cli = CliArgs::default();

        let mut i = 0;
        while i < args.len() {
            let flag = args[i].as_str();
            let mut value = || {
                i += 1;
                args.get(i)
                    .map(String::as_str)
                    .ok_or_else(|| CrtError::Config(format!("{} needs a value", flag)))
            };
            match flag {
                "--monitor" => cli.monitor_index = parse_value(flag, value()?)?,
                "--config" => cli.config_path = Some(PathBuf::from(value()?)),
                "--log-dir" => cli.log_dir = Some(PathBuf::from(value()?)),
                "--stream-logs" => cli.stream_logs = true,
                "--scanlines" => cli.scanlines = Some(parse_value(flag, value()?)?),
                "--curvature" => cli.curvature = Some(parse_value(flag, value()?)?),
                "--vignette" => cli.vignette = Some(parse_value(flag, value()?)?),
                "--aberration" => cli.aberration = Some(parse_value(flag, value()?)?),
                "--no-performance-mode" => cli.no_performance_mode = true,
                other => return Err(CrtError::Config(format!("Unknown argument '{}'\n{}", other, USAGE))),
            }
            i += 1;
        }

        Ok(cli)
    }

    /// Starting parameters; clamped when they enter the shared config.
    fn effect_config(&self) -> EffectConfig {
        let defaults = EffectConfig::default();
        EffectConfig {
            scanline_intensity: self.scanlines.unwrap_or(defaults.scanline_intensity),
            curvature: self.curvature.unwrap_or(defaults.curvature),
            vignette_intensity: self.vignette.unwrap_or(defaults.vignette_intensity),
            chromatic_aberration: self.aberration.unwrap_or(defaults.chromatic_aberration),
            performance_mode: defaults.performance_mode && !self.no_performance_mode,
        }
    }
}

fn parse_value<T: FromStr>(flag: &str, raw: &str) -> std::result::Result<T, CrtError> {
    raw.parse()
        .map_err(|_| CrtError::Config(format!("Invalid value '{}' for {}", raw, flag)))
}

fn main() -> Result<()> {
    let result = run_app();
    let _ = crtveil::logger::finalize_logs();
    result
}

fn run_app() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = CliArgs::parse(&args)?;

    let tuning = match &cli.config_path {
        Some(path) => TuningConfig::load(path)?,
        None => TuningConfig::default(),
    };

    if cli.stream_logs {
        tracing_subscriber::fmt().with_target(false).init();
    }

    let log_dir = cli.log_dir.clone().unwrap_or_else(crtveil::logger::default_log_dir);
    crtveil::logger::init_logger(log_dir, "crtveil", tuning.log_retention_count, cli.stream_logs)?;

    log_info!("=== CrtVeil Starting ===");
    if let Some(log_path) = crtveil::logger::get_log_path() {
        log_info!("Log file: {}", log_path.display());
    }
    if cli.stream_logs {
        log_info!("Streaming mode enabled via --stream-logs");
    } else {
        log_info!("Buffered mode - logs will be written to file on exit");
    }

    if !HAS_PLATFORM_BACKEND {
        log_error!("No overlay backend in this build");
        anyhow::bail!("No overlay backend in this build; rebuild with `--features desktop`");
    }

    let shared = SharedEffectConfig::new(cli.effect_config());
    let effect_config = shared.snapshot();
    log_info!(
        "Configuration: monitor={}, scanlines={:.2}, curvature={:.2}, vignette={:.2}, aberration={:.2}, performance_mode={}",
        cli.monitor_index,
        effect_config.scanline_intensity,
        effect_config.curvature,
        effect_config.vignette_intensity,
        effect_config.chromatic_aberration,
        effect_config.performance_mode
    );

    let monitor = monitor_at(cli.monitor_index)
        .with_context(|| format!("Failed to find monitor {}", cli.monitor_index))?;

    let manager = OverlayManager::new(shared, tuning);
    manager.start(cli.monitor_index, monitor);

    // the render thread clears the flag on Esc, window close or a fatal setup error
    while manager.is_running() {
        std::thread::sleep(Duration::from_millis(100));
    }
    manager.stop();

    if let Some(stats) = manager.frame_stats() {
        log_info!(
            "Last frame stats: {:.1} fps, {:.2} ms render, {} capture failures",
            stats.fps,
            stats.frame_time_ms,
            stats.counters.capture_failures
        );
    }
    log_info!("=== CrtVeil Exiting ===");
    Ok(())
}
