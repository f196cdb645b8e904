// Monitor pixel sources.

#[cfg(windows)]
pub mod duplication;
#[cfg(all(not(windows), feature = "desktop"))]
pub mod screen;

use crate::error::{CrtError, Result};
use crate::raster::RasterBuffer;
use std::collections::VecDeque;

#[cfg(windows)]
pub use duplication::DuplicationCapture;
#[cfg(all(not(windows), feature = "desktop"))]
pub use screen::ScreenCapture;

/// Grabs the current contents of one monitor.
pub trait CaptureSource {
    fn grab(&mut self) -> Result<RasterBuffer>;
}

impl<T: CaptureSource + ?Sized> CaptureSource for Box<T> {
    fn grab(&mut self) -> Result<RasterBuffer> {
        (**self).grab()
    }
}

/// Stands in when the platform source could not be created: every grab fails,
/// so the loop keeps the overlay restored and presents nothing.
#[derive(Debug, Clone)]
pub struct UnavailableCapture {
    reason: String,
}

impl UnavailableCapture {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

impl CaptureSource for UnavailableCapture {
    fn grab(&mut self) -> Result<RasterBuffer> {
        Err(CrtError::Capture(self.reason.clone()))
    }
}

/// Replays a fixed sequence of frames or failures, then keeps returning the
/// last frame. Drives the render loop without a display.
#[derive(Debug, Default)]
pub struct ScriptedCapture {
    script: VecDeque<std::result::Result<RasterBuffer, String>>,
    last: Option<RasterBuffer>,
    grabs: usize,
}

impl ScriptedCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(frames: impl IntoIterator<Item = RasterBuffer>) -> Self {
        let mut capture = Self::new();
        for frame in frames {
            capture.push_frame(frame);
        }
        capture
    }

    pub fn push_frame(&mut self, frame: RasterBuffer) {
        self.script.push_back(Ok(frame));
    }

    pub fn push_failure(&mut self, message: impl Into<String>) {
        self.script.push_back(Err(message.into()));
    }

    pub fn grabs(&self) -> usize {
        self.grabs
    }
}

impl CaptureSource for ScriptedCapture {
    fn grab(&mut self) -> Result<RasterBuffer> {
        self.grabs += 1;
        match self.script.pop_front() {
            Some(Ok(frame)) => {
                self.last = Some(frame.clone());
                Ok(frame)
            }
            Some(Err(message)) => Err(CrtError::Capture(message)),
            None => self
                .last
                .clone()
                .ok_or_else(|| CrtError::Capture("No frames scripted".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_capture_replays_then_repeats() {
        let mut capture = ScriptedCapture::frames([
            RasterBuffer::filled(2, 2, [1, 1, 1]),
            RasterBuffer::filled(2, 2, [2, 2, 2]),
        ]);
        capture.push_failure("device lost");

        assert_eq!(capture.grab().unwrap().pixel(0, 0), [1, 1, 1]);
        assert_eq!(capture.grab().unwrap().pixel(0, 0), [2, 2, 2]);
        assert!(matches!(capture.grab(), Err(CrtError::Capture(m)) if m == "device lost"));
        assert_eq!(capture.grab().unwrap().pixel(0, 0), [2, 2, 2]);
        assert_eq!(capture.grabs(), 4);
    }

    #[test]
    fn unavailable_capture_always_fails_with_reason() {
        let mut capture = UnavailableCapture::new("duplication busy");
        for _ in 0..2 {
            assert!(matches!(capture.grab(), Err(CrtError::Capture(m)) if m == "duplication busy"));
        }
    }

    #[test]
    fn empty_script_is_a_capture_error() {
        let mut capture = ScriptedCapture::new();
        assert!(matches!(capture.grab(), Err(CrtError::Capture(_))));
    }
}
