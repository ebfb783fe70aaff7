//! Video scaling (resolution conversion).
//!
//! A [`ScaleContext`] precomputes separable fixed-point filter taps for one
//! `(w, h) -> (cw, ch)` mapping and then scales packed 8-bit images with them.

use crate::error::{Error, Result};

/// Fractional bits of the filter weights. The taps of every output sample
/// sum to exactly `1 << FILTER_BITS`.
const FILTER_BITS: u32 = 14;
const FILTER_ONE: i32 = 1 << FILTER_BITS;

/// Keys cubic convolution parameter.
const BICUBIC_A: f64 = -0.5;

/// Scaling algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScaleAlgorithm {
    /// Nearest neighbor - fastest, pixelated results.
    NearestNeighbor,
    /// Bilinear interpolation - good quality/speed balance.
    Bilinear,
    /// Bicubic (Keys, a = -0.5) interpolation.
    #[default]
    Bicubic,
}

impl ScaleAlgorithm {
    /// Filter radius in source samples when not downscaling.
    fn support(&self) -> f64 {
        match self {
            Self::NearestNeighbor => 0.5,
            Self::Bilinear => 1.0,
            Self::Bicubic => 2.0,
        }
    }

    fn kernel(&self, x: f64) -> f64 {
        let x = x.abs();
        match self {
            Self::NearestNeighbor => {
                if x < 0.5 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Bilinear => (1.0 - x).max(0.0),
            Self::Bicubic => {
                let a = BICUBIC_A;
                if x <= 1.0 {
                    ((a + 2.0) * x - (a + 3.0)) * x * x + 1.0
                } else if x < 2.0 {
                    ((a * x - 5.0 * a) * x + 8.0 * a) * x - 4.0 * a
                } else {
                    0.0
                }
            }
        }
    }
}

// ============================================================================
// Filter bank
// ============================================================================

/// Filter taps for one axis: for each output sample, a window of `taps`
/// weights starting at `starts[i]` in the source.
#[derive(Debug, Clone)]
struct FilterBank {
    starts: Vec<usize>,
    taps: usize,
    weights: Vec<i32>,
}

impl FilterBank {
    fn new(src_len: usize, dst_len: usize, algorithm: ScaleAlgorithm) -> Self {
        let scale = src_len as f64 / dst_len as f64;
        // Widen the filter when downscaling so every source sample contributes.
        let filter_scale = match algorithm {
            ScaleAlgorithm::NearestNeighbor => 1.0,
            _ => scale.max(1.0),
        };
        let radius = algorithm.support() * filter_scale;

        let mut rows: Vec<(usize, Vec<f64>)> = Vec::with_capacity(dst_len);
        for i in 0..dst_len {
            let center = (i as f64 + 0.5) * scale - 0.5;
            let first = (center - radius).floor() as i64;
            let last = (center + radius).ceil() as i64;

            let lo = first.clamp(0, src_len as i64 - 1) as usize;
            let hi = last.clamp(0, src_len as i64 - 1) as usize;
            let mut window = vec![0.0; hi - lo + 1];

            for j in first..=last {
                let w = algorithm.kernel((j as f64 - center) / filter_scale);
                if w == 0.0 {
                    continue;
                }
                // Edge samples absorb the weight of taps outside the image.
                let idx = j.clamp(0, src_len as i64 - 1) as usize;
                window[idx - lo] += w;
            }

            if window.iter().all(|w| *w == 0.0) {
                let nearest = center.round().clamp(0.0, (src_len - 1) as f64) as usize;
                window[nearest - lo] = 1.0;
            }
            rows.push((lo, window));
        }

        let taps = rows.iter().map(|(_, w)| w.len()).max().unwrap_or(1);
        let mut starts = Vec::with_capacity(dst_len);
        let mut weights = vec![0i32; dst_len * taps];

        for (i, (lo, window)) in rows.into_iter().enumerate() {
            // Shift the window left if it would run past the end of the source.
            let start = lo.min(src_len.saturating_sub(taps));
            let offset = lo - start;
            let sum: f64 = window.iter().sum();
            let out = &mut weights[i * taps..(i + 1) * taps];

            let mut total = 0;
            for (k, w) in window.iter().enumerate() {
                let fixed = (w / sum * FILTER_ONE as f64).round() as i32;
                out[offset + k] = fixed;
                total += fixed;
            }

            // Put the rounding residue on the strongest tap.
            if total != FILTER_ONE {
                let (max_k, _) = out
                    .iter()
                    .enumerate()
                    .max_by_key(|(_, w)| **w)
                    .unwrap_or((0, &0));
                out[max_k] += FILTER_ONE - total;
            }
            starts.push(start);
        }

        Self {
            starts,
            taps,
            weights,
        }
    }

    #[inline]
    fn taps_for(&self, i: usize) -> (usize, &[i32]) {
        (
            self.starts[i],
            &self.weights[i * self.taps..(i + 1) * self.taps],
        )
    }
}

#[inline]
fn round_fixed(acc: i32) -> u8 {
    ((acc + (FILTER_ONE >> 1)) >> FILTER_BITS).clamp(0, 255) as u8
}

// ============================================================================
// Scale Context
// ============================================================================

/// Precomputed scaler for one source and destination size.
///
/// Scales packed images with `channels` interleaved 8-bit samples per pixel,
/// horizontally first and then vertically.
pub struct ScaleContext {
    src_width: u32,
    src_height: u32,
    dst_width: u32,
    dst_height: u32,
    algorithm: ScaleAlgorithm,
    horizontal: FilterBank,
    vertical: FilterBank,
    /// Horizontally scaled rows, `dst_width` x `src_height`.
    scratch: Vec<u8>,
}

impl ScaleContext {
    /// Build the filter taps for `(src_width, src_height) -> (dst_width, dst_height)`.
    pub fn new(
        src_width: u32,
        src_height: u32,
        dst_width: u32,
        dst_height: u32,
        algorithm: ScaleAlgorithm,
    ) -> Result<Self> {
        if src_width == 0 || src_height == 0 || dst_width == 0 || dst_height == 0 {
            return Err(Error::InvalidParameter(format!(
                "cannot scale {}x{} to {}x{}",
                src_width, src_height, dst_width, dst_height
            )));
        }

        Ok(Self {
            src_width,
            src_height,
            dst_width,
            dst_height,
            algorithm,
            horizontal: FilterBank::new(src_width as usize, dst_width as usize, algorithm),
            vertical: FilterBank::new(src_height as usize, dst_height as usize, algorithm),
            scratch: Vec::new(),
        })
    }

    /// Whether this context maps exactly these sizes.
    pub fn matches(&self, src: (u32, u32), dst: (u32, u32)) -> bool {
        (self.src_width, self.src_height) == src && (self.dst_width, self.dst_height) == dst
    }

    /// Source size.
    pub fn src_size(&self) -> (u32, u32) {
        (self.src_width, self.src_height)
    }

    /// Destination size.
    pub fn dst_size(&self) -> (u32, u32) {
        (self.dst_width, self.dst_height)
    }

    /// Filter used by this context.
    pub fn algorithm(&self) -> ScaleAlgorithm {
        self.algorithm
    }

    /// Scale a packed image.
    ///
    /// `input` must hold `src_width * src_height * channels` bytes and
    /// `output` at least `dst_width * dst_height * channels` bytes.
    pub fn scale_packed(&mut self, input: &[u8], output: &mut [u8], channels: usize) -> Result<()> {
        let in_w = self.src_width as usize;
        let in_h = self.src_height as usize;
        let out_w = self.dst_width as usize;
        let out_h = self.dst_height as usize;

        let expected_input = in_w * in_h * channels;
        let expected_output = out_w * out_h * channels;
        if input.len() < expected_input {
            return Err(Error::InvalidFrame(format!(
                "Input buffer too small: {} < {}",
                input.len(),
                expected_input
            )));
        }
        if output.len() < expected_output {
            return Err(Error::Conversion(format!(
                "Output buffer too small: {} < {}",
                output.len(),
                expected_output
            )));
        }

        let scratch_len = out_w * in_h * channels;
        if self.scratch.len() < scratch_len {
            self.scratch
                .try_reserve_exact(scratch_len - self.scratch.len())
                .map_err(|e| {
                    Error::Conversion(format!("cannot allocate scaler rows: {}", e))
                })?;
            self.scratch.resize(scratch_len, 0);
        }

        // Horizontal pass
        for y in 0..in_h {
            let src_row = &input[y * in_w * channels..(y + 1) * in_w * channels];
            let dst_row = &mut self.scratch[y * out_w * channels..(y + 1) * out_w * channels];
            for x in 0..out_w {
                let (start, weights) = self.horizontal.taps_for(x);
                for c in 0..channels {
                    let mut acc = 0i32;
                    for (k, w) in weights.iter().enumerate() {
                        acc += w * src_row[(start + k) * channels + c] as i32;
                    }
                    dst_row[x * channels + c] = round_fixed(acc);
                }
            }
        }

        // Vertical pass
        let row_len = out_w * channels;
        for y in 0..out_h {
            let (start, weights) = self.vertical.taps_for(y);
            let dst_row = &mut output[y * row_len..(y + 1) * row_len];
            for (i, out) in dst_row.iter_mut().enumerate() {
                let mut acc = 0i32;
                for (k, w) in weights.iter().enumerate() {
                    acc += w * self.scratch[(start + k) * row_len + i] as i32;
                }
                *out = round_fixed(acc);
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for ScaleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScaleContext")
            .field("src", &(self.src_width, self.src_height))
            .field("dst", &(self.dst_width, self.dst_height))
            .field("algorithm", &self.algorithm)
            .field("horizontal_taps", &self.horizontal.taps)
            .field("vertical_taps", &self.vertical.taps)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_sum_to_one() {
        for algorithm in [
            ScaleAlgorithm::NearestNeighbor,
            ScaleAlgorithm::Bilinear,
            ScaleAlgorithm::Bicubic,
        ] {
            for (src, dst) in [(7, 3), (3, 7), (640, 256), (256, 1920), (5, 5)] {
                let bank = FilterBank::new(src, dst, algorithm);
                for i in 0..dst {
                    let (start, weights) = bank.taps_for(i);
                    assert!(start + weights.len() <= src.max(bank.taps));
                    assert_eq!(weights.iter().sum::<i32>(), FILTER_ONE);
                }
            }
        }
    }

    #[test]
    fn test_bicubic_kernel() {
        let k = ScaleAlgorithm::Bicubic;
        assert_eq!(k.kernel(0.0), 1.0);
        assert!(k.kernel(1.0).abs() < 1e-12);
        assert!(k.kernel(2.0).abs() < 1e-12);
        // Negative lobe between 1 and 2
        assert!(k.kernel(1.5) < 0.0);
    }

    #[test]
    fn test_scale_nearest_2x() {
        let mut scaler = ScaleContext::new(2, 2, 4, 4, ScaleAlgorithm::NearestNeighbor).unwrap();

        let input = [0, 255, 255, 0]; // 2x2 checkerboard
        let mut output = vec![0u8; 16];

        scaler.scale_packed(&input, &mut output, 1).unwrap();

        #[rustfmt::skip]
        let expected = [
            0, 0, 255, 255,
            0, 0, 255, 255,
            255, 255, 0, 0,
            255, 255, 0, 0,
        ];
        assert_eq!(output, expected);
    }

    #[test]
    fn test_scale_bilinear_between_inputs() {
        let mut scaler = ScaleContext::new(2, 2, 4, 4, ScaleAlgorithm::Bilinear).unwrap();

        let input = [0, 100, 100, 200];
        let mut output = vec![0u8; 16];

        scaler.scale_packed(&input, &mut output, 1).unwrap();

        for &v in &output {
            assert!(v <= 200, "output value {} exceeds max input", v);
        }
        let center_avg =
            (output[5] as u32 + output[6] as u32 + output[9] as u32 + output[10] as u32) / 4;
        assert!(
            center_avg > 10 && center_avg < 190,
            "center values should be interpolated, got {}",
            center_avg
        );
    }

    #[test]
    fn test_bicubic_preserves_uniform_rgb() {
        let mut scaler = ScaleContext::new(13, 9, 8, 6, ScaleAlgorithm::Bicubic).unwrap();
        let input: Vec<u8> = [200u8, 100, 50].repeat(13 * 9);
        let mut output = vec![0u8; 8 * 6 * 3];

        scaler.scale_packed(&input, &mut output, 3).unwrap();

        for px in output.chunks_exact(3) {
            assert_eq!(px, &[200, 100, 50]);
        }
    }

    #[test]
    fn test_bicubic_upscale_preserves_uniform() {
        let mut scaler = ScaleContext::new(4, 4, 10, 6, ScaleAlgorithm::Bicubic).unwrap();
        let input = [255u8; 16];
        let mut output = vec![0u8; 60];

        scaler.scale_packed(&input, &mut output, 1).unwrap();
        assert!(output.iter().all(|&v| v == 255));
    }

    #[test]
    fn test_matches() {
        let ctx = ScaleContext::new(640, 480, 256, 256, ScaleAlgorithm::Bicubic).unwrap();
        assert!(ctx.matches((640, 480), (256, 256)));
        assert!(!ctx.matches((640, 480), (256, 128)));
    }

    #[test]
    fn test_error_on_zero_dimension() {
        assert!(ScaleContext::new(0, 100, 200, 200, ScaleAlgorithm::Bicubic).is_err());
    }

    #[test]
    fn test_error_on_short_input() {
        let mut ctx = ScaleContext::new(4, 4, 2, 2, ScaleAlgorithm::Bilinear).unwrap();
        let mut output = [0u8; 4];
        assert!(matches!(
            ctx.scale_packed(&[0u8; 10], &mut output, 1),
            Err(Error::InvalidFrame(_))
        ));
    }
}
