// CPU rendition of the CRT look.
//
// Stage order is fixed: chromatic aberration, barrel curvature, scanlines,
// vignette. Curvature resamples geometry, so the two axis-aligned overlays
// that follow it land on the distorted image.

use crate::config::EffectConfig;
use crate::error::Result;
use crate::raster::RasterBuffer;

/// Stateless effect chain. The native size is the monitor resolution and only
/// scales the chromatic aberration offset when running on a reduced buffer.
#[derive(Debug, Clone, Copy)]
pub struct EffectsPipeline {
    native_width: u32,
    native_height: u32,
}

impl EffectsPipeline {
    pub fn new(native_width: u32, native_height: u32) -> Self {
        Self {
            native_width,
            native_height,
        }
    }

    pub fn native_size(&self) -> (u32, u32) {
        (self.native_width, self.native_height)
    }

    /// Runs the full chain and returns a buffer with the input's dimensions.
    pub fn apply(&self, buffer: &RasterBuffer, config: &EffectConfig) -> Result<RasterBuffer> {
        buffer.ensure_non_empty()?;

        if !config.performance_mode {
            return self.run_stages(buffer, config);
        }

        let (width, height) = buffer.dimensions();
        let small = buffer.resized((width / 2).max(1), (height / 2).max(1))?;
        let processed = self.run_stages(&small, config)?;
        processed.resized(width, height)
    }

    fn run_stages(&self, buffer: &RasterBuffer, config: &EffectConfig) -> Result<RasterBuffer> {
        let native_width = if self.native_width == 0 {
            buffer.width()
        } else {
            self.native_width
        };

        let offset = chromatic_offset(config.chromatic_aberration, buffer.width(), native_width);
        let shifted = chromatic_aberration(buffer, offset)?;
        let mut curved = barrel_curvature(&shifted, config.curvature)?;
        scanlines(&mut curved, config.scanline_intensity)?;
        vignette(&mut curved, config.vignette_intensity)?;
        Ok(curved)
    }
}

/// Horizontal channel shift in pixels for the given buffer width.
///
/// Zero when the aberration is off; otherwise at least one pixel.
pub fn chromatic_offset(aberration: f32, current_width: u32, native_width: u32) -> u32 {
    if !(aberration > 0.0) || native_width == 0 {
        return 0;
    }
    let scaled = (aberration as f64 * current_width as f64 / native_width as f64).round();
    (scaled as u32).max(1)
}

/// Shifts red right and blue left by `offset` pixels. Columns with no source
/// keep their original value for the shifted channel.
pub fn chromatic_aberration(buffer: &RasterBuffer, offset: u32) -> Result<RasterBuffer> {
    buffer.ensure_non_empty()?;

    let mut out = buffer.clone();
    let width = buffer.width() as usize;
    let offset = offset as usize;
    if offset == 0 || offset >= width {
        return Ok(out);
    }

    for y in 0..buffer.height() {
        let src = buffer.row(y);
        let dst = out.row_mut(y);
        for x in offset..width {
            dst[x * 3] = src[(x - offset) * 3];
        }
        for x in 0..width - offset {
            dst[x * 3 + 2] = src[(x + offset) * 3 + 2];
        }
    }

    Ok(out)
}

/// Backward barrel warp: every output pixel samples one clamped source pixel.
pub fn barrel_curvature(buffer: &RasterBuffer, curvature: f32) -> Result<RasterBuffer> {
    buffer.ensure_non_empty()?;

    if curvature == 0.0 {
        return Ok(buffer.clone());
    }

    let (width, height) = buffer.dimensions();
    let xs = normalized_axis(width);
    let ys = normalized_axis(height);
    let half_w = width as f32 / 2.0;
    let half_h = height as f32 / 2.0;
    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;

    let mut out = RasterBuffer::new(width, height);
    for (y, &ny) in ys.iter().enumerate() {
        let dst = out.row_mut(y as u32);
        for (x, &nx) in xs.iter().enumerate() {
            let r = (nx * nx + ny * ny).sqrt();
            let f = 1.0 + r * (curvature * r * 0.25);

            let sx = ((nx * f + 1.0) * half_w).floor().clamp(0.0, max_x) as u32;
            let sy = ((ny * f + 1.0) * half_h).floor().clamp(0.0, max_y) as u32;

            let src = &buffer.row(sy)[sx as usize * 3..sx as usize * 3 + 3];
            dst[x * 3..x * 3 + 3].copy_from_slice(src);
        }
    }

    Ok(out)
}

/// Blends black at `intensity` opacity over every even row.
pub fn scanlines(buffer: &mut RasterBuffer, intensity: f32) -> Result<()> {
    buffer.ensure_non_empty()?;

    let keep = 1.0 - intensity.clamp(0.0, 1.0);
    if keep >= 1.0 {
        return Ok(());
    }

    for y in (0..buffer.height()).step_by(2) {
        for c in buffer.row_mut(y) {
            *c = (*c as f32 * keep).round() as u8;
        }
    }

    Ok(())
}

/// Multiplies every channel by `clamp(1 - r * intensity, 0, 1)`.
pub fn vignette(buffer: &mut RasterBuffer, intensity: f32) -> Result<()> {
    buffer.ensure_non_empty()?;

    if intensity == 0.0 {
        return Ok(());
    }

    let (width, height) = buffer.dimensions();
    let xs = normalized_axis(width);
    let ys = normalized_axis(height);

    for (y, &ny) in ys.iter().enumerate() {
        let row = buffer.row_mut(y as u32);
        for (x, &nx) in xs.iter().enumerate() {
            let r = (nx * nx + ny * ny).sqrt();
            let factor = (1.0 - r * intensity).clamp(0.0, 1.0);
            for c in &mut row[x * 3..x * 3 + 3] {
                *c = (*c as f32 * factor).round() as u8;
            }
        }
    }

    Ok(())
}

/// `n` evenly spaced samples over `[-1, 1]`, endpoints included.
fn normalized_axis(n: u32) -> Vec<f32> {
    if n == 1 {
        return vec![-1.0];
    }
    let step = 2.0 / (n - 1) as f32;
    (0..n).map(|i| -1.0 + i as f32 * step).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CrtError;

    fn gradient(width: u32, height: u32) -> RasterBuffer {
        let mut buf = RasterBuffer::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let v = ((x * 31 + y * 17) % 251) as u8;
                buf.set_pixel(x, y, [v, v.wrapping_mul(3), 255 - v]);
            }
        }
        buf
    }

    #[test]
    fn apply_keeps_dimensions_for_every_mode() {
        let input = gradient(37, 21);
        let pipeline = EffectsPipeline::new(37, 21);
        for performance_mode in [false, true] {
            let config = EffectConfig {
                scanline_intensity: 0.3,
                curvature: 0.5,
                vignette_intensity: 0.5,
                chromatic_aberration: 5.0,
                performance_mode,
            };
            let out = pipeline.apply(&input, &config).unwrap();
            assert_eq!(out.dimensions(), (37, 21));
        }
    }

    #[test]
    fn apply_handles_single_pixel_in_performance_mode() {
        let input = RasterBuffer::filled(1, 1, [40, 50, 60]);
        let out = EffectsPipeline::new(1, 1)
            .apply(&input, &EffectConfig::default())
            .unwrap();
        assert_eq!(out.dimensions(), (1, 1));
    }

    #[test]
    fn apply_rejects_empty_buffer() {
        let err = EffectsPipeline::new(10, 10)
            .apply(&RasterBuffer::new(0, 10), &EffectConfig::default())
            .unwrap_err();
        assert!(matches!(err, CrtError::EmptyBuffer { .. }));
    }

    #[test]
    fn passthrough_config_is_identity() {
        let input = gradient(16, 9);
        let out = EffectsPipeline::new(16, 9)
            .apply(&input, &EffectConfig::passthrough())
            .unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn zero_curvature_is_pixel_identical() {
        let input = gradient(13, 7);
        assert_eq!(barrel_curvature(&input, 0.0).unwrap(), input);
    }

    #[test]
    fn curvature_fills_every_pixel_from_source_palette() {
        let input = gradient(20, 12);
        let out = barrel_curvature(&input, 0.5).unwrap();
        let palette: std::collections::HashSet<[u8; 3]> = input
            .as_raw()
            .chunks_exact(3)
            .map(|c| [c[0], c[1], c[2]])
            .collect();
        for c in out.as_raw().chunks_exact(3) {
            assert!(palette.contains(&[c[0], c[1], c[2]]));
        }
    }

    #[test]
    fn curvature_pulls_corners_from_the_edge() {
        let mut input = RasterBuffer::filled(11, 11, [0, 0, 0]);
        input.set_pixel(0, 0, [255, 0, 0]);
        let out = barrel_curvature(&input, 0.5).unwrap();
        // corner samples beyond the buffer and clamps back onto (0, 0)
        assert_eq!(out.pixel(0, 0), [255, 0, 0]);
    }

    #[test]
    fn chromatic_offset_is_monotonic_and_at_least_one() {
        let mut last = 0;
        for step in 1..=50 {
            let aberration = step as f32 * 0.1;
            let offset = chromatic_offset(aberration, 960, 1920);
            assert!(offset >= 1);
            assert!(offset >= last);
            last = offset;
        }
        assert_eq!(chromatic_offset(0.0, 960, 1920), 0);
        assert_eq!(chromatic_offset(4.0, 1920, 1920), 4);
        assert_eq!(chromatic_offset(4.0, 960, 1920), 2);
    }

    #[test]
    fn chromatic_shift_is_clamped_not_wrapped() {
        let mut input = RasterBuffer::new(4, 1);
        for x in 0..4 {
            let v = (x as u8 + 1) * 10;
            input.set_pixel(x, 0, [v, v, v]);
        }
        let out = chromatic_aberration(&input, 1).unwrap();

        let reds: Vec<u8> = (0..4).map(|x| out.pixel(x, 0)[0]).collect();
        let greens: Vec<u8> = (0..4).map(|x| out.pixel(x, 0)[1]).collect();
        let blues: Vec<u8> = (0..4).map(|x| out.pixel(x, 0)[2]).collect();
        assert_eq!(reds, vec![10, 10, 20, 30]);
        assert_eq!(greens, vec![10, 20, 30, 40]);
        assert_eq!(blues, vec![20, 30, 40, 40]);
    }

    #[test]
    fn chromatic_shift_wider_than_buffer_changes_nothing() {
        let input = gradient(3, 2);
        assert_eq!(chromatic_aberration(&input, 3).unwrap(), input);
    }

    #[test]
    fn scanlines_darken_even_rows_only() {
        let mut buf = RasterBuffer::filled(2, 4, [200, 100, 50]);
        scanlines(&mut buf, 0.5).unwrap();
        assert_eq!(buf.pixel(0, 0), [100, 50, 25]);
        assert_eq!(buf.pixel(1, 1), [200, 100, 50]);
        assert_eq!(buf.pixel(0, 2), [100, 50, 25]);
        assert_eq!(buf.pixel(1, 3), [200, 100, 50]);
    }

    #[test]
    fn vignette_darkens_corners_more_than_center() {
        let mut buf = RasterBuffer::filled(9, 9, [200, 200, 200]);
        vignette(&mut buf, 0.5).unwrap();
        let center = buf.pixel(4, 4)[0];
        let corner = buf.pixel(0, 0)[0];
        assert_eq!(center, 200);
        // r = sqrt(2) at the corner
        assert_eq!(corner, (200.0 * (1.0 - 2f32.sqrt() * 0.5)).round() as u8);
    }

    #[test]
    fn vignette_is_multiplicative() {
        let mut buf = RasterBuffer::filled(3, 3, [0, 0, 0]);
        vignette(&mut buf, 0.5).unwrap();
        assert_eq!(buf, RasterBuffer::filled(3, 3, [0, 0, 0]));
    }

    #[test]
    fn apply_is_deterministic() {
        let input = gradient(24, 16);
        let pipeline = EffectsPipeline::new(48, 32);
        let config = EffectConfig {
            curvature: 0.3,
            ..EffectConfig::default()
        };
        assert_eq!(pipeline.apply(&input, &config).unwrap(), pipeline.apply(&input, &config).unwrap());
    }

    #[test]
    fn normalized_axis_spans_unit_interval() {
        let axis = normalized_axis(5);
        assert_eq!(axis, vec![-1.0, -0.5, 0.0, 0.5, 1.0]);
        assert_eq!(normalized_axis(1), vec![-1.0]);
    }
}
