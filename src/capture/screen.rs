use super::CaptureSource;
use crate::error::{CrtError, Result};
use crate::log_info;
use crate::monitor::MonitorGeometry;
use crate::raster::RasterBuffer;
use xcap::Monitor;

/// Portable screenshot capture through xcap.
///
/// The monitor handle is re-resolved on every grab so a display that was
/// unplugged and re-attached is picked up again.
pub struct ScreenCapture {
    monitor_index: usize,
    geometry: MonitorGeometry,
}

impl ScreenCapture {
    pub fn new(monitor_index: usize, geometry: MonitorGeometry) -> Result<Self> {
        let capture = Self {
            monitor_index,
            geometry,
        };
        capture.find_monitor()?;
        log_info!(
            "Screen capture initialized for monitor {} ({}x{} at {},{})",
            monitor_index,
            geometry.width,
            geometry.height,
            geometry.left,
            geometry.top
        );
        Ok(capture)
    }

    fn find_monitor(&self) -> Result<Monitor> {
        let monitors = Monitor::all().map_err(|e| CrtError::Capture(format!("Failed to get monitors: {}", e)))?;
        let found = monitors.len();

        let matches_geometry = |m: &Monitor| {
            m.x().unwrap_or(i32::MIN) == self.geometry.left
                && m.y().unwrap_or(i32::MIN) == self.geometry.top
                && m.width().unwrap_or(0) == self.geometry.width
                && m.height().unwrap_or(0) == self.geometry.height
        };

        // monitor order can shift when displays change; prefer the one at our geometry
        let position = monitors
            .iter()
            .position(matches_geometry)
            .unwrap_or(self.monitor_index);

        monitors
            .into_iter()
            .nth(position)
            .ok_or(CrtError::MonitorNotFound {
                index: self.monitor_index,
                found,
            })
    }
}

impl CaptureSource for ScreenCapture {
    fn grab(&mut self) -> Result<RasterBuffer> {
        let monitor = self.find_monitor()?;
        let image = monitor
            .capture_image()
            .map_err(|e| CrtError::Capture(format!("Failed to capture screen: {}", e)))?;
        Ok(RasterBuffer::from_rgba(&image))
    }
}
