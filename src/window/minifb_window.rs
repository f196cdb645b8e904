// Portable overlay window on minifb. On X11 the window is also turned into a
// click-through dock and hidden by unmapping; parking it off-screen is the
// fallback everywhere.
#[cfg(target_os = "linux")]
use super::x11::X11Shell;
use super::{OverlayBackend, OverlayWindowHandle, Visibility};
use crate::error::{CrtError, Result};
use crate::input::Key;
use crate::monitor::MonitorGeometry;
use crate::raster::RasterBuffer;
use crate::{log_info, log_warn};
use minifb::{KeyRepeat, Window, WindowOptions};

/// Where the window parks while hidden. Far outside any real desktop.
const PARK_POSITION: (isize, isize) = (-32000, -32000);

/// True when a window of `size` at `position` no longer covers any of `monitor`.
fn left_monitor(position: (isize, isize), size: (u32, u32), monitor: &MonitorGeometry) -> bool {
    let (Ok(left), Ok(top)) = (i32::try_from(position.0), i32::try_from(position.1)) else {
        return true;
    };
    !monitor.overlaps(&MonitorGeometry::new(left, top, size.0, size.1))
}

pub struct MinifbOverlay {
    window: Option<Window>,
    #[cfg(target_os = "linux")]
    shell: Option<X11Shell>,
    geometry: Option<MonitorGeometry>,
    visibility: Visibility,
}

impl Default for MinifbOverlay {
    fn default() -> Self {
        Self::new()
    }
}

impl MinifbOverlay {
    pub fn new() -> Self {
        Self {
            window: None,
            #[cfg(target_os = "linux")]
            shell: None,
            geometry: None,
            visibility: Visibility::Absent,
        }
    }

    #[cfg(target_os = "linux")]
    fn attach_shell(&mut self, raw: usize) {
        match X11Shell::attach(raw).and_then(|shell| shell.make_overlay().map(|()| shell)) {
            Ok(shell) => {
                log_info!("Overlay marked as click-through X11 dock");
                self.shell = Some(shell);
            }
            Err(e) => log_warn!("Overlay stays a plain window, hiding by parking only: {}", e),
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn attach_shell(&mut self, _raw: usize) {}

    /// Primary hide: unmap through X11.
    #[cfg(target_os = "linux")]
    fn unmap(&self) -> bool {
        match self.shell.as_ref().map(X11Shell::unmap) {
            Some(Ok(unmapped)) => unmapped,
            Some(Err(e)) => {
                log_warn!("Unmap failed, parking overlay instead: {}", e);
                false
            }
            None => false,
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn unmap(&self) -> bool {
        false
    }

    /// Fallback hide: move off-screen and check the window manager let it go.
    fn park(&mut self) -> bool {
        let (Some(window), Some(geometry)) = (self.window.as_mut(), self.geometry) else {
            return false;
        };
        window.topmost(false);
        window.set_position(PARK_POSITION.0, PARK_POSITION.1);
        // minifb only applies moves while processing events
        window.update();

        #[cfg(target_os = "linux")]
        if let Some(placement) = self.shell.as_ref().and_then(|shell| shell.placement().ok()) {
            return !geometry.overlaps(&placement);
        }
        left_monitor(window.get_position(), geometry.size(), &geometry)
    }

    #[cfg(target_os = "linux")]
    fn remap(&self) {
        if let Some(Err(e)) = self.shell.as_ref().map(X11Shell::map) {
            log_warn!("Failed to map overlay: {}", e);
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn remap(&self) {}

    fn place(&mut self) {
        if let (Some(window), Some(geometry)) = (self.window.as_mut(), self.geometry) {
            window.set_position(geometry.left as isize, geometry.top as isize);
            window.topmost(true);
            self.visibility = Visibility::Shown;
        }
    }
}

impl OverlayBackend for MinifbOverlay {
    fn setup(&mut self, geometry: MonitorGeometry) -> Result<OverlayWindowHandle> {
        let options = WindowOptions {
            borderless: true,
            title: false,
            resize: false,
            topmost: true,
            ..WindowOptions::default()
        };
        let mut window = Window::new(
            "CRT Veil",
            geometry.width as usize,
            geometry.height as usize,
            options,
        )
        .map_err(|e| CrtError::Window(format!("Failed to create window: {}", e)))?;
        window.set_position(geometry.left as isize, geometry.top as isize);

        let raw = window.get_window_handle() as usize;
        self.window = Some(window);
        self.geometry = Some(geometry);
        self.visibility = Visibility::Shown;
        self.attach_shell(raw);

        log_info!(
            "Overlay window created at {},{} ({}x{})",
            geometry.left,
            geometry.top,
            geometry.width,
            geometry.height
        );
        Ok(OverlayWindowHandle { raw, geometry })
    }

    fn hide(&mut self) -> bool {
        if self.window.is_none() {
            return false;
        }
        let hidden = self.unmap() || self.park();
        if hidden {
            self.visibility = Visibility::Hidden;
        }
        hidden
    }

    fn restore(&mut self) {
        if self.visibility == Visibility::Hidden {
            self.remap();
        }
        self.place();
    }

    fn ensure_restored(&mut self) {
        self.remap();
        self.place();
        if let Some(window) = self.window.as_mut() {
            window.update();
        }
    }

    fn present(&mut self, frame: &RasterBuffer) -> Result<()> {
        let Some(window) = self.window.as_mut() else {
            return Err(CrtError::Present("Overlay window not created".to_string()));
        };
        frame.ensure_non_empty()?;

        let pixels = frame.to_0rgb();
        window
            .update_with_buffer(&pixels, frame.width() as usize, frame.height() as usize)
            .map_err(|e| CrtError::Present(format!("Failed to update window: {}", e)))
    }

    fn poll_keys(&mut self) -> Vec<Key> {
        let Some(window) = self.window.as_ref() else {
            return Vec::new();
        };
        if !window.is_open() {
            return vec![Key::Close];
        }

        window
            .get_keys_pressed(KeyRepeat::No)
            .into_iter()
            .filter_map(|key| match key {
                minifb::Key::Escape => Some(Key::Escape),
                minifb::Key::Key0 | minifb::Key::NumPad0 => Some(Key::Digit0),
                minifb::Key::Key1 | minifb::Key::NumPad1 => Some(Key::Digit1),
                minifb::Key::Key2 | minifb::Key::NumPad2 => Some(Key::Digit2),
                minifb::Key::Key3 | minifb::Key::NumPad3 => Some(Key::Digit3),
                minifb::Key::Key4 | minifb::Key::NumPad4 => Some(Key::Digit4),
                minifb::Key::Key5 | minifb::Key::NumPad5 => Some(Key::Digit5),
                minifb::Key::Key6 | minifb::Key::NumPad6 => Some(Key::Digit6),
                minifb::Key::Key7 | minifb::Key::NumPad7 => Some(Key::Digit7),
                minifb::Key::Key8 | minifb::Key::NumPad8 => Some(Key::Digit8),
                minifb::Key::P => Some(Key::P),
                _ => None,
            })
            .collect()
    }

    fn visibility(&self) -> Visibility {
        self.visibility
    }

    fn teardown(&mut self) {
        #[cfg(target_os = "linux")]
        {
            self.shell = None;
        }
        if self.window.take().is_some() {
            log_info!("Overlay window closed");
        }
        self.geometry = None;
        self.visibility = Visibility::Absent;
    }
}
