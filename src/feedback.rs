// Self-capture detection.
//
// Hiding the overlay before each grab is best effort. When the grab still
// comes back (near) identical to a recent capture, the guard treats it as the
// overlay or the compositor handing back stale output, and serves the last
// filtered frame instead of filtering it again.

use crate::config::TuningConfig;
use crate::error::Result;
use crate::raster::RasterBuffer;
use std::collections::VecDeque;
use std::time::Duration;

/// How many of the newest history entries a capture is compared against.
const COMPARED_ENTRIES: usize = 2;

/// Bounded FIFO of recent pre-filter captures, used only for comparison.
#[derive(Debug, Clone)]
pub struct FrameHistory {
    frames: VecDeque<RasterBuffer>,
    capacity: usize,
}

impl FrameHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn push(&mut self, frame: RasterBuffer) {
        self.frames.push_back(frame);
        while self.frames.len() > self.capacity {
            self.frames.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Newest first, at most `n` entries.
    pub fn newest(&self, n: usize) -> impl Iterator<Item = &RasterBuffer> {
        self.frames.iter().rev().take(n)
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

/// True when `capture` is within `threshold` mean absolute difference of
/// either of the two newest history entries. Frames of a different size
/// never match.
pub fn is_feedback(capture: &RasterBuffer, history: &FrameHistory, threshold: f64) -> bool {
    history.newest(COMPARED_ENTRIES).any(|previous| {
        capture
            .mean_abs_diff(previous)
            .map(|diff| diff < threshold)
            .unwrap_or(false)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Fresh content: filtered, recorded in history.
    Normal,
    /// Self-capture: the last good frame is served unchanged.
    Feedback,
    /// Looked like feedback but nothing has been filtered yet, so it was filtered anyway.
    Bootstrap,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuardSettings {
    pub history_capacity: usize,
    pub threshold: f64,
    pub max_retries: u32,
    pub retry_pause: Duration,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self::from(&TuningConfig::default())
    }
}

impl From<&TuningConfig> for GuardSettings {
    fn from(tuning: &TuningConfig) -> Self {
        Self {
            history_capacity: tuning.history_capacity,
            threshold: tuning.feedback_threshold,
            max_retries: tuning.max_feedback_retries,
            retry_pause: tuning.feedback_retry_delay(),
        }
    }
}

/// Result of one guarded tick.
#[derive(Debug)]
pub struct GuardOutcome<'a> {
    pub frame: &'a RasterBuffer,
    pub classification: Classification,
    /// Set once the retry bound is exceeded; the caller sleeps this long.
    pub pause: Option<Duration>,
}

/// Owns the frame history, the last good frame and the retry counter.
/// Only the render thread touches it.
#[derive(Debug)]
pub struct FeedbackGuard {
    history: FrameHistory,
    last_good: Option<RasterBuffer>,
    retries: u32,
    settings: GuardSettings,
}

impl FeedbackGuard {
    pub fn new(settings: GuardSettings) -> Self {
        Self {
            history: FrameHistory::new(settings.history_capacity),
            last_good: None,
            retries: 0,
            settings,
        }
    }

    pub fn history(&self) -> &FrameHistory {
        &self.history
    }

    pub fn last_good(&self) -> Option<&RasterBuffer> {
        self.last_good.as_ref()
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn settings(&self) -> &GuardSettings {
        &self.settings
    }

    pub fn is_feedback(&self, capture: &RasterBuffer) -> bool {
        is_feedback(capture, &self.history, self.settings.threshold)
    }

    /// Classifies `capture` and produces the frame to present.
    ///
    /// `filter` runs only for normal and bootstrap ticks. If it fails, the
    /// guard state is left untouched and the error is returned.
    pub fn process<F>(&mut self, capture: RasterBuffer, filter: F) -> Result<GuardOutcome<'_>>
    where
        F: FnOnce(&RasterBuffer) -> Result<RasterBuffer>,
    {
        let feedback = self.is_feedback(&capture);
        match (&mut self.last_good, feedback) {
            (Some(frame), true) => {
                self.retries += 1;
                let pause = if self.retries > self.settings.max_retries {
                    self.retries = 0;
                    Some(self.settings.retry_pause)
                } else {
                    None
                };
                Ok(GuardOutcome {
                    frame,
                    classification: Classification::Feedback,
                    pause,
                })
            }
            // nothing good yet: filter whatever came back
            (slot, true) => {
                let filtered = filter(&capture)?;
                Ok(GuardOutcome {
                    frame: slot.insert(filtered),
                    classification: Classification::Bootstrap,
                    pause: None,
                })
            }
            (slot, false) => {
                let filtered = filter(&capture)?;
                self.retries = 0;
                self.history.push(capture);
                Ok(GuardOutcome {
                    frame: slot.insert(filtered),
                    classification: Classification::Normal,
                    pause: None,
                })
            }
        }
    }

    /// Forgets history and the cached frame, e.g. after the monitor changes size.
    pub fn reset(&mut self) {
        self.history.clear();
        self.last_good = None;
        self.retries = 0;
    }
}
