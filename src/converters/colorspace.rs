//! Pixel format conversion (colorspace conversion).
//!
//! Converts interleaved RGB to planar I420 using the standard color
//! matrices (BT.601, BT.709) in either limited or full range.

use crate::config::ConverterConfig;
use crate::error::{Error, Result};
use crate::frame::FrameBuffer;

use super::scale::ScaleContext;

/// Fractional bits of the RGB to YUV coefficients.
const COEF_BITS: u32 = 15;
const COEF_ONE: f64 = (1 << COEF_BITS) as f64;

/// Color matrix for YUV ↔ RGB conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorMatrix {
    /// BT.601 (SD video, most common)
    #[default]
    Bt601,
    /// BT.709 (HD video)
    Bt709,
}

impl ColorMatrix {
    /// Luma weights `(Kr, Kb)`.
    fn kr_kb(&self) -> (f64, f64) {
        match self {
            Self::Bt601 => (0.299, 0.114),
            Self::Bt709 => (0.2126, 0.0722),
        }
    }
}

/// Value range of the YUV output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorRange {
    /// "MPEG" range: Y in 16..=235, U/V in 16..=240.
    #[default]
    Limited,
    /// "JPEG" range: all components use 0..=255.
    Full,
}

impl ColorRange {
    fn luma_offset(&self) -> i32 {
        match self {
            Self::Limited => 16,
            Self::Full => 0,
        }
    }

    fn luma_scale(&self) -> f64 {
        match self {
            Self::Limited => 219.0 / 255.0,
            Self::Full => 1.0,
        }
    }

    fn chroma_scale(&self) -> f64 {
        match self {
            Self::Limited => 224.0 / 255.0,
            Self::Full => 1.0,
        }
    }
}

// ============================================================================
// Coefficients
// ============================================================================

/// Fixed-point RGB to YUV coefficients for one matrix and range.
///
/// Each row of the matrix sums to an exact fixed-point value, so grey
/// inputs never pick up a chroma offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YuvCoefficients {
    y: [i32; 3],
    u: [i32; 3],
    v: [i32; 3],
    y_offset: i32,
}

impl YuvCoefficients {
    /// Build the coefficients.
    pub fn new(matrix: ColorMatrix, range: ColorRange) -> Self {
        let (kr, kb) = matrix.kr_kb();
        let ys = range.luma_scale() * COEF_ONE;
        let cs = range.chroma_scale() * COEF_ONE;

        let fix = |x: f64| x.round() as i32;

        let yr = fix(kr * ys);
        let yb = fix(kb * ys);
        let yg = fix(ys) - yr - yb;

        let ur = fix(-kr / (2.0 * (1.0 - kb)) * cs);
        let ub = fix(0.5 * cs);
        let ug = -ur - ub;

        let vr = fix(0.5 * cs);
        let vb = fix(-kb / (2.0 * (1.0 - kr)) * cs);
        let vg = -vr - vb;

        Self {
            y: [yr, yg, yb],
            u: [ur, ug, ub],
            v: [vr, vg, vb],
            y_offset: range.luma_offset(),
        }
    }

    /// Luma of one pixel.
    #[inline]
    pub fn luma(&self, r: u8, g: u8, b: u8) -> u8 {
        let acc = self.y[0] * r as i32 + self.y[1] * g as i32 + self.y[2] * b as i32;
        (((acc + (1 << (COEF_BITS - 1))) >> COEF_BITS) + self.y_offset).clamp(0, 255) as u8
    }

    /// Unrounded chroma of one pixel, in fixed point, centered on zero.
    #[inline]
    fn chroma_fixed(&self, r: u8, g: u8, b: u8) -> (i32, i32) {
        let (r, g, b) = (r as i32, g as i32, b as i32);
        (
            self.u[0] * r + self.u[1] * g + self.u[2] * b,
            self.v[0] * r + self.v[1] * g + self.v[2] * b,
        )
    }

    /// Chroma of one pixel.
    #[inline]
    pub fn chroma(&self, r: u8, g: u8, b: u8) -> (u8, u8) {
        let (u, v) = self.chroma_fixed(r, g, b);
        (finish_chroma(u, 0), finish_chroma(v, 0))
    }
}

impl Default for YuvCoefficients {
    fn default() -> Self {
        Self::new(ColorMatrix::Bt601, ColorRange::Limited)
    }
}

/// Round a sum of `1 << extra_bits` fixed-point chroma values to a sample.
#[inline]
fn finish_chroma(sum: i32, extra_bits: u32) -> u8 {
    let shift = COEF_BITS + extra_bits;
    (((sum + (1 << (shift - 1))) >> shift) + 128).clamp(0, 255) as u8
}

// ============================================================================
// RGB to I420
// ============================================================================

/// Convert interleaved RGB of exactly the buffer's size into `dst`.
///
/// Chroma is the rounded average of each 2x2 block.
pub fn rgb24_to_i420(src: &[u8], coeffs: &YuvCoefficients, dst: &mut FrameBuffer) -> Result<()> {
    let w = dst.width() as usize;
    let h = dst.height() as usize;
    let expected = w * h * 3;
    if src.len() != expected {
        return Err(Error::InvalidFrame(format!(
            "RGB buffer has {} bytes, expected {} for {}x{}",
            src.len(),
            expected,
            w,
            h
        )));
    }

    let (y_stride, uv_stride, _) = dst.strides();
    let (y_plane, u_plane, v_plane) = dst.planes_mut();

    for row in 0..h {
        let src_row = &src[row * w * 3..(row + 1) * w * 3];
        let dst_row = &mut y_plane[row * y_stride..row * y_stride + w];
        for (px, out) in src_row.chunks_exact(3).zip(dst_row.iter_mut()) {
            *out = coeffs.luma(px[0], px[1], px[2]);
        }
    }

    for row in (0..h).step_by(2) {
        for col in (0..w).step_by(2) {
            let mut u_sum = 0i32;
            let mut v_sum = 0i32;

            for dy in 0..2 {
                for dx in 0..2 {
                    let idx = ((row + dy) * w + (col + dx)) * 3;
                    let (u, v) = coeffs.chroma_fixed(src[idx], src[idx + 1], src[idx + 2]);
                    u_sum += u;
                    v_sum += v;
                }
            }

            let uv_idx = (row / 2) * uv_stride + col / 2;
            u_plane[uv_idx] = finish_chroma(u_sum, 2);
            v_plane[uv_idx] = finish_chroma(v_sum, 2);
        }
    }

    Ok(())
}

// ============================================================================
// Color Converter
// ============================================================================

/// RGB to I420 converter with a cached scaling context.
///
/// The context is keyed by `(w, h) -> (cw, ch)` and rebuilt only when the
/// source or destination size changes.
pub struct ColorConverter {
    config: ConverterConfig,
    coeffs: YuvCoefficients,
    context: Option<ScaleContext>,
    /// Source scaled to the destination size, still RGB.
    scaled: Vec<u8>,
}

impl ColorConverter {
    /// Create a converter.
    pub fn new(config: ConverterConfig) -> Self {
        Self {
            config,
            coeffs: YuvCoefficients::new(config.matrix, config.range),
            context: None,
            scaled: Vec::new(),
        }
    }

    /// Converter settings.
    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// The cached scaling context, if any conversion needed one.
    pub fn context(&self) -> Option<&ScaleContext> {
        self.context.as_ref()
    }

    /// Convert `width` x `height` RGB into `dst`, scaling to the buffer's size if needed.
    pub fn convert(
        &mut self,
        src: &[u8],
        width: u32,
        height: u32,
        dst: &mut FrameBuffer,
    ) -> Result<()> {
        let expected = 3 * width as usize * height as usize;
        if width == 0 || height == 0 || src.len() != expected {
            return Err(Error::InvalidFrame(format!(
                "RGB frame {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                src.len()
            )));
        }

        let src_size = (width, height);
        let dst_size = (dst.width(), dst.height());
        if src_size == dst_size {
            return rgb24_to_i420(src, &self.coeffs, dst);
        }

        let context = match self.context.take() {
            Some(ctx) if ctx.matches(src_size, dst_size) => ctx,
            _ => {
                tracing::debug!(
                    "Building {:?} scale context {}x{} -> {}x{}",
                    self.config.algorithm,
                    width,
                    height,
                    dst_size.0,
                    dst_size.1
                );
                ScaleContext::new(width, height, dst_size.0, dst_size.1, self.config.algorithm)?
            }
        };
        let context = self.context.insert(context);

        let scaled_len = 3 * dst_size.0 as usize * dst_size.1 as usize;
        if self.scaled.len() != scaled_len {
            self.scaled.clear();
            self.scaled.try_reserve_exact(scaled_len).map_err(|e| {
                Error::Conversion(format!(
                    "cannot allocate {} byte intermediate image: {}",
                    scaled_len, e
                ))
            })?;
            self.scaled.resize(scaled_len, 0);
        }

        context.scale_packed(src, &mut self.scaled, 3)?;
        rgb24_to_i420(&self.scaled, &self.coeffs, dst)
    }
}

impl Default for ColorConverter {
    fn default() -> Self {
        Self::new(ConverterConfig::default())
    }
}

impl std::fmt::Debug for ColorConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColorConverter")
            .field("config", &self.config)
            .field("context", &self.context)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converters::ScaleAlgorithm;

    fn uniform(w: u32, h: u32, rgb: [u8; 3]) -> Vec<u8> {
        rgb.repeat(w as usize * h as usize)
    }

    #[test]
    fn test_white_and_black_limited() {
        let c = YuvCoefficients::default();
        assert_eq!(c.luma(255, 255, 255), 235);
        assert_eq!(c.chroma(255, 255, 255), (128, 128));
        assert_eq!(c.luma(0, 0, 0), 16);
        assert_eq!(c.chroma(0, 0, 0), (128, 128));
    }

    #[test]
    fn test_white_full_range() {
        let c = YuvCoefficients::new(ColorMatrix::Bt601, ColorRange::Full);
        assert_eq!(c.luma(255, 255, 255), 255);
        assert_eq!(c.luma(0, 0, 0), 0);
        assert_eq!(c.chroma(255, 255, 255), (128, 128));
    }

    #[test]
    fn test_primaries_bt601() {
        let c = YuvCoefficients::default();
        // Reference values for limited-range BT.601
        assert!((c.luma(255, 0, 0) as i32 - 82).abs() <= 1);
        assert!((c.luma(0, 255, 0) as i32 - 145).abs() <= 1);
        assert!((c.luma(0, 0, 255) as i32 - 41).abs() <= 1);
        let (u, v) = c.chroma(0, 0, 255);
        assert!((u as i32 - 240).abs() <= 1);
        assert!((v as i32 - 110).abs() <= 1);
    }

    #[test]
    fn test_greys_have_neutral_chroma() {
        for matrix in [ColorMatrix::Bt601, ColorMatrix::Bt709] {
            for range in [ColorRange::Limited, ColorRange::Full] {
                let c = YuvCoefficients::new(matrix, range);
                for g in [0u8, 17, 128, 200, 255] {
                    assert_eq!(c.chroma(g, g, g), (128, 128));
                }
            }
        }
    }

    #[test]
    fn test_rgb24_to_i420_white() {
        let mut buf = FrameBuffer::new(8, 4).unwrap();
        let rgb = uniform(8, 4, [255, 255, 255]);
        rgb24_to_i420(&rgb, &YuvCoefficients::default(), &mut buf).unwrap();

        let planar = buf.as_planar();
        for y in 0..4 {
            for x in 0..8 {
                assert_eq!(planar.luma(x, y), 235);
            }
        }
        for y in 0..2 {
            for x in 0..4 {
                assert_eq!(planar.chroma(x, y), (128, 128));
            }
        }
    }

    #[test]
    fn test_chroma_is_block_average() {
        let mut buf = FrameBuffer::new(2, 2).unwrap();
        // One blue pixel and three black ones
        let rgb = [0, 0, 255, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let coeffs = YuvCoefficients::default();
        rgb24_to_i420(&rgb, &coeffs, &mut buf).unwrap();

        let (u, _) = buf.as_planar().chroma(0, 0);
        let (blue_u, _) = coeffs.chroma(0, 0, 255);
        let expected = 128 + (blue_u as i32 - 128) / 4;
        assert!((u as i32 - expected).abs() <= 1);
    }

    #[test]
    fn test_converter_rejects_bad_length() {
        let mut conv = ColorConverter::default();
        let mut buf = FrameBuffer::new(4, 4).unwrap();
        assert!(matches!(
            conv.convert(&[0u8; 47], 4, 4, &mut buf),
            Err(Error::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_converter_caches_context() {
        let mut conv = ColorConverter::default();
        let mut buf = FrameBuffer::new(16, 16).unwrap();

        conv.convert(&uniform(16, 16, [9, 9, 9]), 16, 16, &mut buf)
            .unwrap();
        assert!(conv.context().is_none());

        conv.convert(&uniform(40, 30, [255, 255, 255]), 40, 30, &mut buf)
            .unwrap();
        assert!(conv.context().unwrap().matches((40, 30), (16, 16)));
        assert_eq!(buf.as_planar().luma(7, 7), 235);

        conv.convert(&uniform(20, 10, [0, 0, 0]), 20, 10, &mut buf)
            .unwrap();
        let ctx = conv.context().unwrap();
        assert_eq!(ctx.src_size(), (20, 10));
        assert_eq!(ctx.algorithm(), ScaleAlgorithm::Bicubic);
        assert_eq!(buf.as_planar().luma(0, 0), 16);
    }
}
