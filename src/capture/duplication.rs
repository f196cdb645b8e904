// DXGI desktop duplication, read back to the CPU each grab.
use super::CaptureSource;
use crate::error::{CrtError, Result};
use crate::log_info;
use crate::raster::RasterBuffer;

use windows::{
    core::Interface,
    Win32::Foundation::HMODULE,
    Win32::Graphics::{Direct3D::*, Direct3D11::*, Dxgi::Common::*, Dxgi::*},
    Win32::System::Com::*,
};

/// How long a grab waits for the compositor to produce a new frame.
const ACQUIRE_TIMEOUT_MS: u32 = 5;

pub struct DuplicationCapture {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    duplication: Option<IDXGIOutputDuplication>,
    staging_texture: Option<ID3D11Texture2D>,
    monitor_index: usize,
    width: u32,
    height: u32,
    /// Returned again when the compositor has nothing new.
    last_frame: Option<RasterBuffer>,
}

impl DuplicationCapture {
    pub fn new(monitor_index: usize) -> Result<Self> {
        unsafe {
            // may already be initialised on this thread
            let _ = CoInitializeEx(None, COINIT_MULTITHREADED);

            let mut device: Option<ID3D11Device> = None;
            let mut context: Option<ID3D11DeviceContext> = None;

            let feature_levels = [
                D3D_FEATURE_LEVEL_11_1,
                D3D_FEATURE_LEVEL_11_0,
                D3D_FEATURE_LEVEL_10_1,
                D3D_FEATURE_LEVEL_10_0,
            ];

            D3D11CreateDevice(
                None,
                D3D_DRIVER_TYPE_HARDWARE,
                HMODULE::default(),
                D3D11_CREATE_DEVICE_FLAG(0),
                Some(&feature_levels),
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                Some(&mut context),
            )
            .map_err(|e| CrtError::Capture(format!("Failed to create D3D11 device: {:?}", e)))?;

            let device = device.ok_or_else(|| CrtError::Capture("D3D11 returned no device".to_string()))?;
            let context = context.ok_or_else(|| CrtError::Capture("D3D11 returned no context".to_string()))?;

            let mut capture = Self {
                device,
                context,
                duplication: None,
                staging_texture: None,
                monitor_index,
                width: 0,
                height: 0,
                last_frame: None,
            };
            capture.duplicate_output()?;

            log_info!(
                "Desktop duplication initialized for monitor {} ({}x{})",
                monitor_index,
                capture.width,
                capture.height
            );
            Ok(capture)
        }
    }

    unsafe fn duplicate_output(&mut self) -> Result<()> {
        let dxgi_device: IDXGIDevice = self
            .device
            .cast()
            .map_err(|e| CrtError::Capture(format!("Failed to cast to IDXGIDevice: {:?}", e)))?;

        let adapter = dxgi_device
            .GetAdapter()
            .map_err(|e| CrtError::Capture(format!("Failed to get adapter: {:?}", e)))?;

        let output = adapter
            .EnumOutputs(self.monitor_index as u32)
            .map_err(|_| CrtError::MonitorNotFound {
                index: self.monitor_index,
                found: 0,
            })?;

        let output1: IDXGIOutput1 = output
            .cast()
            .map_err(|e| CrtError::Capture(format!("Failed to cast to IDXGIOutput1: {:?}", e)))?;

        let desc = output
            .GetDesc()
            .map_err(|e| CrtError::Capture(format!("Failed to get output description: {:?}", e)))?;
        self.width = (desc.DesktopCoordinates.right - desc.DesktopCoordinates.left) as u32;
        self.height = (desc.DesktopCoordinates.bottom - desc.DesktopCoordinates.top) as u32;

        let duplication = output1.DuplicateOutput(&self.device).map_err(|e| {
            CrtError::Capture(format!(
                "Failed to create desktop duplication - another app may already be using it: {:?}",
                e
            ))
        })?;

        self.duplication = Some(duplication);
        self.staging_texture = None;
        Ok(())
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    unsafe fn read_texture(&mut self, texture: &ID3D11Texture2D) -> Result<RasterBuffer> {
        let mut desc: D3D11_TEXTURE2D_DESC = std::mem::zeroed();
        texture.GetDesc(&mut desc);

        if self.staging_texture.is_none() || desc.Width != self.width || desc.Height != self.height {
            let staging_desc = D3D11_TEXTURE2D_DESC {
                Width: desc.Width,
                Height: desc.Height,
                MipLevels: 1,
                ArraySize: 1,
                Format: desc.Format,
                SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
                Usage: D3D11_USAGE_STAGING,
                BindFlags: 0,
                CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
                MiscFlags: 0,
            };

            let mut staging: Option<ID3D11Texture2D> = None;
            self.device
                .CreateTexture2D(&staging_desc, None, Some(&mut staging))
                .map_err(|e| CrtError::Capture(format!("Failed to create staging texture: {:?}", e)))?;
            self.staging_texture = staging;
            self.width = desc.Width;
            self.height = desc.Height;
        }

        let staging = self
            .staging_texture
            .as_ref()
            .ok_or_else(|| CrtError::Capture("Staging texture missing".to_string()))?;

        self.context.CopyResource(staging, texture);

        let mut mapped: D3D11_MAPPED_SUBRESOURCE = std::mem::zeroed();
        self.context
            .Map(staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
            .map_err(|e| CrtError::Capture(format!("Failed to map staging texture: {:?}", e)))?;

        let pitch = mapped.RowPitch as usize;
        let row_size = self.width as usize * 4;
        let height = self.height as usize;
        let mut bgra = vec![0u8; row_size * height];

        for y in 0..height {
            std::ptr::copy_nonoverlapping(
                (mapped.pData as *const u8).add(y * pitch),
                bgra.as_mut_ptr().add(y * row_size),
                row_size,
            );
        }

        self.context.Unmap(staging, 0);

        RasterBuffer::from_bgra(self.width, self.height, &bgra)
    }
}

impl CaptureSource for DuplicationCapture {
    fn grab(&mut self) -> Result<RasterBuffer> {
        unsafe {
            if self.duplication.is_none() {
                self.duplicate_output()?;
            }
            let Some(duplication) = self.duplication.clone() else {
                return Err(CrtError::Capture("Desktop duplication unavailable".to_string()));
            };

            let _ = duplication.ReleaseFrame();

            let mut frame_info: DXGI_OUTDUPL_FRAME_INFO = std::mem::zeroed();
            let mut desktop_resource: Option<IDXGIResource> = None;

            match duplication.AcquireNextFrame(ACQUIRE_TIMEOUT_MS, &mut frame_info, &mut desktop_resource) {
                Ok(_) => {
                    let resource = desktop_resource
                        .ok_or_else(|| CrtError::Capture("Acquired frame had no resource".to_string()))?;
                    let texture: ID3D11Texture2D = resource
                        .cast()
                        .map_err(|e| CrtError::Capture(format!("Failed to cast to ID3D11Texture2D: {:?}", e)))?;

                    let frame = self.read_texture(&texture);
                    let _ = duplication.ReleaseFrame();
                    let frame = frame?;
                    self.last_frame = Some(frame.clone());
                    Ok(frame)
                }
                Err(e) if e.code() == DXGI_ERROR_WAIT_TIMEOUT => {
                    // nothing new on screen: hand back the previous grab
                    self.last_frame
                        .clone()
                        .ok_or_else(|| CrtError::Capture("No frame available yet".to_string()))
                }
                Err(e) if e.code() == DXGI_ERROR_ACCESS_LOST => {
                    self.duplication = None;
                    Err(CrtError::Capture(
                        "Desktop duplication access lost - monitor may have been disconnected or changed".to_string(),
                    ))
                }
                Err(e) => Err(CrtError::Capture(format!("Failed to acquire frame: {:?}", e))),
            }
        }
    }
}

impl Drop for DuplicationCapture {
    fn drop(&mut self) {
        unsafe {
            if let Some(duplication) = self.duplication.take() {
                let _ = duplication.ReleaseFrame();
            }
            CoUninitialize();
        }
    }
}
