use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const SCANLINE_RANGE: (f32, f32) = (0.0, 0.5);
pub const CURVATURE_RANGE: (f32, f32) = (0.0, 0.5);
pub const VIGNETTE_RANGE: (f32, f32) = (0.0, 0.5);
pub const ABERRATION_RANGE: (f32, f32) = (0.0, 5.0);

/// Live effect parameters. The pipeline reads these as-is; range clamping
/// happens when the control surface writes through [`SharedEffectConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectConfig {
    pub scanline_intensity: f32,
    pub curvature: f32,
    pub vignette_intensity: f32,
    pub chromatic_aberration: f32,
    pub performance_mode: bool,
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            scanline_intensity: 0.05,
            curvature: 0.0,
            vignette_intensity: 0.05,
            chromatic_aberration: 0.25,
            performance_mode: true,
        }
    }
}

impl EffectConfig {
    /// Every effect disabled; useful as a base for targeted tests and previews.
    pub fn passthrough() -> Self {
        Self {
            scanline_intensity: 0.0,
            curvature: 0.0,
            vignette_intensity: 0.0,
            chromatic_aberration: 0.0,
            performance_mode: false,
        }
    }

    pub fn clamped(mut self) -> Self {
        self.scanline_intensity = clamp_field(self.scanline_intensity, SCANLINE_RANGE);
        self.curvature = clamp_field(self.curvature, CURVATURE_RANGE);
        self.vignette_intensity = clamp_field(self.vignette_intensity, VIGNETTE_RANGE);
        self.chromatic_aberration = clamp_field(self.chromatic_aberration, ABERRATION_RANGE);
        self
    }
}

fn clamp_field(value: f32, (min, max): (f32, f32)) -> f32 {
    if value.is_nan() {
        return min;
    }
    value.clamp(min, max)
}

/// Thread-safe handle the control surface writes and the render loop reads.
///
/// Writers hold the lock for the whole record, so a reader's snapshot is
/// always either fully before or fully after a write.
#[derive(Debug, Clone, Default)]
pub struct SharedEffectConfig {
    inner: Arc<RwLock<EffectConfig>>,
}

impl SharedEffectConfig {
    pub fn new(initial: EffectConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial.clamped())),
        }
    }

    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&EffectConfig) -> R,
    {
        f(&self.inner.read())
    }

    /// Applies `f`, then clamps every numeric field into its documented range.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut EffectConfig),
    {
        let mut config = self.inner.write();
        f(&mut config);
        *config = config.clamped();
    }

    pub fn snapshot(&self) -> EffectConfig {
        *self.inner.read()
    }
}

/// Per-key adjustment sizes for the numeric parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepSizes {
    pub scanlines: f32,
    pub curvature: f32,
    pub chromatic_aberration: f32,
    pub vignette: f32,
}

impl Default for StepSizes {
    fn default() -> Self {
        Self {
            scanlines: 0.05,
            curvature: 0.02,
            chromatic_aberration: 0.5,
            vignette: 0.05,
        }
    }
}

/// Fixed loop constants, overridable from a read-only JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    pub history_capacity: usize,
    pub feedback_threshold: f64,
    pub max_feedback_retries: u32,
    pub feedback_retry_delay_ms: u64,
    pub capture_settle_delay_ms: u64,
    pub refresh_rate_fallback: f32,
    pub steps: StepSizes,
    pub log_retention_count: usize,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            history_capacity: 3,
            feedback_threshold: 5.0,
            max_feedback_retries: 5,
            feedback_retry_delay_ms: 100,
            capture_settle_delay_ms: 20,
            refresh_rate_fallback: 60.0,
            steps: StepSizes::default(),
            log_retention_count: 10,
        }
    }
}

impl TuningConfig {
    /// Missing file means defaults; a present but unparsable file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read tuning file {}", path.display()))?;

        let config: TuningConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse tuning file {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.history_capacity < 2 {
            anyhow::bail!("history_capacity must be at least 2, got {}", self.history_capacity);
        }
        if !(self.feedback_threshold >= 0.0) {
            anyhow::bail!("feedback_threshold must be non-negative, got {}", self.feedback_threshold);
        }
        if !(self.refresh_rate_fallback > 0.0) {
            anyhow::bail!("refresh_rate_fallback must be positive, got {}", self.refresh_rate_fallback);
        }
        Ok(())
    }

    pub fn capture_settle_delay(&self) -> Duration {
        Duration::from_millis(self.capture_settle_delay_ms)
    }

    pub fn feedback_retry_delay(&self) -> Duration {
        Duration::from_millis(self.feedback_retry_delay_ms)
    }
}
