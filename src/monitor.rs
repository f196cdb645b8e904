use crate::error::{CrtError, Result};

#[cfg(windows)]
use windows::{
    core::BOOL,
    Win32::Foundation::{LPARAM, RECT},
    Win32::Graphics::Gdi::{
        EnumDisplayMonitors, EnumDisplaySettingsW, GetMonitorInfoW, DEVMODEW, ENUM_CURRENT_SETTINGS, HDC,
        HMONITOR, MONITORINFOEXW,
    },
};

/// Capture target and overlay placement, in virtual-desktop pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorGeometry {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl MonitorGeometry {
    pub fn new(left: i32, top: i32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Whether the two rectangles share at least one pixel.
    pub fn overlaps(&self, other: &MonitorGeometry) -> bool {
        let right = |g: &MonitorGeometry| g.left as i64 + g.width as i64;
        let bottom = |g: &MonitorGeometry| g.top as i64 + g.height as i64;
        let empty = |g: &MonitorGeometry| g.width == 0 || g.height == 0;
        !empty(self)
            && !empty(other)
            && (self.left as i64) < right(other)
            && (other.left as i64) < right(self)
            && (self.top as i64) < bottom(other)
            && (other.top as i64) < bottom(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorInfo {
    pub geometry: MonitorGeometry,
    /// As reported by the platform; `None` when it could not be queried.
    pub refresh_rate: Option<f32>,
}

/// Picks the reported refresh rate when it is usable, else `fallback`.
pub fn resolve_refresh_rate(reported: Option<f32>, fallback: f32) -> f32 {
    match reported {
        Some(hz) if hz.is_finite() && hz > 1.0 => hz,
        _ => fallback,
    }
}

/// Geometry and refresh rate of the monitor at `index` in platform order.
#[cfg(windows)]
pub fn monitor_at(index: usize) -> Result<MonitorInfo> {
    use std::sync::Mutex;

    let monitors = Mutex::new(Vec::<MonitorInfo>::new());

    unsafe {
        let _ = EnumDisplayMonitors(
            None,
            None,
            Some(monitor_enum_proc),
            LPARAM(&monitors as *const _ as isize),
        );
    }

    let monitors = monitors.into_inner().unwrap_or_default();
    let found = monitors.len();
    monitors
        .into_iter()
        .nth(index)
        .ok_or(CrtError::MonitorNotFound { index, found })
}

#[cfg(windows)]
unsafe extern "system" fn monitor_enum_proc(hmonitor: HMONITOR, _hdc: HDC, _rect: *mut RECT, lparam: LPARAM) -> BOOL {
    use std::sync::Mutex;

    let monitors = &*(lparam.0 as *const Mutex<Vec<MonitorInfo>>);

    let mut info: MONITORINFOEXW = std::mem::zeroed();
    info.monitorInfo.cbSize = std::mem::size_of::<MONITORINFOEXW>() as u32;

    if GetMonitorInfoW(hmonitor, &mut info as *mut _ as *mut _).as_bool() {
        let rect = info.monitorInfo.rcMonitor;
        let geometry = MonitorGeometry::new(
            rect.left,
            rect.top,
            (rect.right - rect.left).max(0) as u32,
            (rect.bottom - rect.top).max(0) as u32,
        );

        let mut dev_mode: DEVMODEW = std::mem::zeroed();
        dev_mode.dmSize = std::mem::size_of::<DEVMODEW>() as u16;
        let refresh_rate = if EnumDisplaySettingsW(
            windows::core::PCWSTR(info.szDevice.as_ptr()),
            ENUM_CURRENT_SETTINGS,
            &mut dev_mode,
        )
        .as_bool()
        {
            Some(dev_mode.dmDisplayFrequency as f32)
        } else {
            None
        };

        if let Ok(mut monitors) = monitors.lock() {
            monitors.push(MonitorInfo { geometry, refresh_rate });
        }
    }

    true.into()
}

#[cfg(all(not(windows), feature = "desktop"))]
pub fn monitor_at(index: usize) -> Result<MonitorInfo> {
    let monitors = xcap::Monitor::all().map_err(|e| CrtError::Capture(format!("Failed to list monitors: {}", e)))?;
    let found = monitors.len();
    let monitor = monitors
        .get(index)
        .ok_or(CrtError::MonitorNotFound { index, found })?;

    Ok(MonitorInfo {
        geometry: MonitorGeometry::new(
            monitor.x().unwrap_or(0),
            monitor.y().unwrap_or(0),
            monitor.width().unwrap_or(0),
            monitor.height().unwrap_or(0),
        ),
        refresh_rate: monitor.frequency().ok(),
    })
}

#[cfg(all(not(windows), not(feature = "desktop")))]
pub fn monitor_at(index: usize) -> Result<MonitorInfo> {
    Err(CrtError::MonitorNotFound { index, found: 0 })
}
