// Layered, topmost, click-through popup covering one monitor.
use super::{OverlayBackend, OverlayWindowHandle, Visibility};
use crate::error::{CrtError, Result};
use crate::input::Key;
use crate::monitor::MonitorGeometry;
use crate::raster::RasterBuffer;
use crate::{log_info, log_warn};

use windows::{
    core::*,
    Win32::Foundation::*,
    Win32::Graphics::Gdi::{
        GetDC, ReleaseDC, StretchDIBits, BITMAPINFO, BITMAPINFOHEADER, BI_RGB, DIB_RGB_COLORS, SRCCOPY,
    },
    Win32::UI::Input::KeyboardAndMouse::{GetAsyncKeyState, VK_ESCAPE},
    Win32::UI::WindowsAndMessaging::*,
};

const CLASS_NAME: PCWSTR = w!("CrtVeilOverlay");

/// Virtual-key codes polled each tick. The window never takes focus, so keys
/// are read from the global async state and edge-triggered here.
const KEY_CODES: [(u16, Key); 11] = [
    (VK_ESCAPE.0, Key::Escape),
    (0x30, Key::Digit0),
    (0x31, Key::Digit1),
    (0x32, Key::Digit2),
    (0x33, Key::Digit3),
    (0x34, Key::Digit4),
    (0x35, Key::Digit5),
    (0x36, Key::Digit6),
    (0x37, Key::Digit7),
    (0x38, Key::Digit8),
    (0x50, Key::P),
];

pub struct Win32Overlay {
    hwnd: Option<HWND>,
    geometry: Option<MonitorGeometry>,
    keys_down: [bool; KEY_CODES.len()],
    closed: bool,
}

impl Default for Win32Overlay {
    fn default() -> Self {
        Self::new()
    }
}

impl Win32Overlay {
    pub fn new() -> Self {
        Self {
            hwnd: None,
            geometry: None,
            keys_down: [false; KEY_CODES.len()],
            closed: false,
        }
    }

    unsafe fn create_overlay_window(geometry: MonitorGeometry) -> Result<HWND> {
        let hinstance = windows::Win32::System::LibraryLoader::GetModuleHandleW(None)
            .map_err(|e| CrtError::Window(format!("Failed to get module handle: {:?}", e)))?;

        let wc = WNDCLASSW {
            lpfnWndProc: Some(window_proc),
            hInstance: hinstance.into(),
            lpszClassName: CLASS_NAME,
            style: CS_HREDRAW | CS_VREDRAW,
            ..Default::default()
        };

        // zero when the class survives from an earlier session, which is fine
        RegisterClassW(&wc);

        let hwnd = CreateWindowExW(
            WS_EX_LAYERED | WS_EX_TRANSPARENT | WS_EX_TOPMOST | WS_EX_NOACTIVATE | WS_EX_TOOLWINDOW,
            CLASS_NAME,
            w!("CRT Veil"),
            WS_POPUP,
            geometry.left,
            geometry.top,
            geometry.width as i32,
            geometry.height as i32,
            None,
            None,
            Some(HINSTANCE(hinstance.0)),
            None,
        )
        .map_err(|e| CrtError::Window(format!("Failed to create overlay window: {:?}", e)))?;

        SetLayeredWindowAttributes(hwnd, COLORREF(0), 255, LWA_ALPHA)
            .map_err(|e| CrtError::Window(format!("Failed to set layered attributes: {:?}", e)))?;

        // extra protection on builds that support it; hiding stays the primary path
        if let Err(e) = SetWindowDisplayAffinity(hwnd, WDA_EXCLUDEFROMCAPTURE) {
            log_warn!("Failed to exclude overlay from capture: {:?}", e);
        } else {
            log_info!("Overlay excluded from desktop duplication (WDA_EXCLUDEFROMCAPTURE)");
        }

        let _ = ShowWindow(hwnd, SW_SHOWNOACTIVATE);
        Ok(hwnd)
    }

    fn is_visible(hwnd: HWND) -> bool {
        unsafe { IsWindowVisible(hwnd).as_bool() }
    }

    fn reassert_topmost(hwnd: HWND) {
        unsafe {
            let _ = SetWindowPos(
                hwnd,
                Some(HWND_TOPMOST),
                0,
                0,
                0,
                0,
                SWP_NOMOVE | SWP_NOSIZE | SWP_NOACTIVATE,
            );
        }
    }

    fn show_with_fallback(hwnd: HWND) {
        unsafe {
            let _ = ShowWindow(hwnd, SW_SHOWNOACTIVATE);
            if !Self::is_visible(hwnd) {
                let _ = SetWindowPos(
                    hwnd,
                    None,
                    0,
                    0,
                    0,
                    0,
                    SWP_SHOWWINDOW | SWP_NOMOVE | SWP_NOSIZE | SWP_NOZORDER | SWP_NOACTIVATE,
                );
            }
        }
    }

    fn pump_messages(&mut self) {
        unsafe {
            let mut msg = MSG::default();
            while PeekMessageW(&mut msg, None, 0, 0, PM_REMOVE).as_bool() {
                if msg.message == WM_QUIT {
                    self.closed = true;
                    continue;
                }
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }
    }
}

impl OverlayBackend for Win32Overlay {
    fn setup(&mut self, geometry: MonitorGeometry) -> Result<OverlayWindowHandle> {
        let hwnd = unsafe { Self::create_overlay_window(geometry)? };
        self.hwnd = Some(hwnd);
        self.geometry = Some(geometry);
        log_info!(
            "Overlay window created at {},{} ({}x{})",
            geometry.left,
            geometry.top,
            geometry.width,
            geometry.height
        );
        Ok(OverlayWindowHandle {
            raw: hwnd.0 as usize,
            geometry,
        })
    }

    fn hide(&mut self) -> bool {
        let Some(hwnd) = self.hwnd else {
            return false;
        };
        unsafe {
            let _ = ShowWindow(hwnd, SW_HIDE);
            if Self::is_visible(hwnd) {
                let _ = SetWindowPos(
                    hwnd,
                    None,
                    0,
                    0,
                    0,
                    0,
                    SWP_HIDEWINDOW | SWP_NOMOVE | SWP_NOSIZE | SWP_NOZORDER | SWP_NOACTIVATE,
                );
            }
        }
        !Self::is_visible(hwnd)
    }

    fn restore(&mut self) {
        if let Some(hwnd) = self.hwnd {
            Self::show_with_fallback(hwnd);
            Self::reassert_topmost(hwnd);
        }
    }

    fn ensure_restored(&mut self) {
        let Some(hwnd) = self.hwnd else {
            return;
        };
        unsafe {
            let _ = ShowWindow(hwnd, SW_SHOWNOACTIVATE);
            let _ = SetWindowPos(
                hwnd,
                None,
                0,
                0,
                0,
                0,
                SWP_SHOWWINDOW | SWP_NOMOVE | SWP_NOSIZE | SWP_NOZORDER | SWP_NOACTIVATE,
            );
        }
        Self::reassert_topmost(hwnd);
    }

    fn present(&mut self, frame: &RasterBuffer) -> Result<()> {
        let (Some(hwnd), Some(geometry)) = (self.hwnd, self.geometry) else {
            return Err(CrtError::Present("Overlay window not created".to_string()));
        };
        frame.ensure_non_empty()?;

        let pixels = frame.to_bgrx();
        let info = BITMAPINFO {
            bmiHeader: BITMAPINFOHEADER {
                biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
                biWidth: frame.width() as i32,
                // negative height: top-down rows
                biHeight: -(frame.height() as i32),
                biPlanes: 1,
                biBitCount: 32,
                biCompression: BI_RGB.0,
                ..Default::default()
            },
            ..Default::default()
        };

        unsafe {
            let hdc = GetDC(Some(hwnd));
            if hdc.is_invalid() {
                return Err(CrtError::Present("GetDC returned no device context".to_string()));
            }
            let lines = StretchDIBits(
                hdc,
                0,
                0,
                geometry.width as i32,
                geometry.height as i32,
                0,
                0,
                frame.width() as i32,
                frame.height() as i32,
                Some(pixels.as_ptr() as *const _),
                &info,
                DIB_RGB_COLORS,
                SRCCOPY,
            );
            ReleaseDC(Some(hwnd), hdc);

            if lines == 0 {
                return Err(CrtError::Present("StretchDIBits copied no scan lines".to_string()));
            }
        }
        Ok(())
    }

    fn poll_keys(&mut self) -> Vec<Key> {
        self.pump_messages();

        let mut pressed = Vec::new();
        if std::mem::take(&mut self.closed) {
            pressed.push(Key::Close);
        }
        for (i, (code, key)) in KEY_CODES.iter().enumerate() {
            let down = unsafe { GetAsyncKeyState(*code as i32) as u16 & 0x8000 != 0 };
            if down && !self.keys_down[i] {
                pressed.push(*key);
            }
            self.keys_down[i] = down;
        }
        pressed
    }

    fn visibility(&self) -> Visibility {
        match self.hwnd {
            Some(hwnd) if Self::is_visible(hwnd) => Visibility::Shown,
            Some(_) => Visibility::Hidden,
            None => Visibility::Absent,
        }
    }

    fn teardown(&mut self) {
        if let Some(hwnd) = self.hwnd.take() {
            unsafe {
                let _ = DestroyWindow(hwnd);
            }
            log_info!("Overlay window destroyed");
        }
        self.geometry = None;
    }
}

impl Drop for Win32Overlay {
    fn drop(&mut self) {
        self.teardown();
    }
}

unsafe extern "system" fn window_proc(hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    match msg {
        WM_DESTROY => {
            PostQuitMessage(0);
            LRESULT(0)
        }
        _ => DefWindowProcW(hwnd, msg, wparam, lparam),
    }
}
