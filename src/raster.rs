use crate::error::{CrtError, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage, RgbaImage};

/// Row-major RGB raster, 8 bits per channel.
///
/// A zero-sized buffer can exist, but every effect stage rejects it through
/// [`RasterBuffer::ensure_non_empty`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterBuffer {
    image: RgbImage,
}

impl RasterBuffer {
    /// Black buffer of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbImage::new(width, height),
        }
    }

    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        Self {
            image: RgbImage::from_pixel(width, height, Rgb(rgb)),
        }
    }

    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let len = data.len();
        if len != width as usize * height as usize * 3 {
            return Err(CrtError::BadPixelData { width, height, len });
        }
        RgbImage::from_raw(width, height, data)
            .map(|image| Self { image })
            .ok_or(CrtError::BadPixelData { width, height, len })
    }

    /// Drops the alpha channel of a captured RGBA image.
    pub fn from_rgba(rgba: &RgbaImage) -> Self {
        let (width, height) = rgba.dimensions();
        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for px in rgba.pixels() {
            data.extend_from_slice(&px.0[..3]);
        }
        Self {
            image: RgbImage::from_raw(width, height, data).unwrap_or_else(|| RgbImage::new(width, height)),
        }
    }

    /// Converts tightly packed BGRA rows (DXGI's native layout) to RGB.
    pub fn from_bgra(width: u32, height: u32, bgra: &[u8]) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if bgra.len() != expected {
            return Err(CrtError::BadPixelData {
                width,
                height,
                len: bgra.len(),
            });
        }

        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for chunk in bgra.chunks_exact(4) {
            data.extend_from_slice(&[chunk[2], chunk[1], chunk[0]]);
        }
        Self::from_raw(width, height, data)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn ensure_non_empty(&self) -> Result<()> {
        if self.is_empty() {
            return Err(CrtError::EmptyBuffer {
                width: self.width(),
                height: self.height(),
            });
        }
        Ok(())
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        self.image.get_pixel(x, y).0
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        self.image.put_pixel(x, y, Rgb(rgb));
    }

    pub fn row(&self, y: u32) -> &[u8] {
        let stride = self.stride();
        let start = y as usize * stride;
        &self.image.as_raw()[start..start + stride]
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let stride = self.stride();
        let start = y as usize * stride;
        let raw: &mut [u8] = &mut self.image;
        &mut raw[start..start + stride]
    }

    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    fn stride(&self) -> usize {
        self.width() as usize * 3
    }

    /// Bilinear resample to a new size.
    pub fn resized(&self, width: u32, height: u32) -> Result<Self> {
        self.ensure_non_empty()?;
        if width == 0 || height == 0 {
            return Err(CrtError::EmptyBuffer { width, height });
        }
        if (width, height) == self.dimensions() {
            return Ok(self.clone());
        }
        Ok(Self {
            image: imageops::resize(&self.image, width, height, FilterType::Triangle),
        })
    }

    /// Mean absolute per-channel difference on the 0-255 scale.
    pub fn mean_abs_diff(&self, other: &RasterBuffer) -> Result<f64> {
        self.ensure_non_empty()?;
        if self.dimensions() != other.dimensions() {
            return Err(CrtError::DimensionMismatch {
                left: self.dimensions(),
                right: other.dimensions(),
            });
        }

        let total: u64 = self
            .as_raw()
            .iter()
            .zip(other.as_raw())
            .map(|(a, b)| a.abs_diff(*b) as u64)
            .sum();
        Ok(total as f64 / self.as_raw().len() as f64)
    }

    /// Packs pixels as `0x00RRGGBB`, the layout minifb expects.
    pub fn to_0rgb(&self) -> Vec<u32> {
        self.as_raw()
            .chunks_exact(3)
            .map(|c| ((c[0] as u32) << 16) | ((c[1] as u32) << 8) | c[2] as u32)
            .collect()
    }

    /// Packs pixels as BGRX bytes for 32-bit GDI DIBs.
    pub fn to_bgrx(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.as_raw().len() / 3 * 4);
        for c in self.as_raw().chunks_exact(3) {
            out.extend_from_slice(&[c[2], c[1], c[0], 0]);
        }
        out
    }
}
