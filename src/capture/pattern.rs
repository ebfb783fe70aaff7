//! Synthetic screen source for demos and tests.

use crate::error::Result;
use crate::frame::RgbImage;

use super::FrameSource;

/// Test patterns a [`PatternSource`] can draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pattern {
    /// SMPTE colour bars with a white bar sweeping across them.
    #[default]
    SweepingBars,
    /// Black and white squares that shift by one square each frame.
    Checkerboard,
    /// A single colour.
    Solid([u8; 3]),
    /// Pseudo-random pixels, reproducible per frame index.
    Noise,
}

/// Generates RGB frames of a fixed size.
#[derive(Debug, Clone)]
pub struct PatternSource {
    width: u32,
    height: u32,
    pattern: Pattern,
    checker_size: u32,
    limit: Option<u64>,
    sequence: u64,
}

impl PatternSource {
    /// A source producing `width` x `height` frames with the default pattern.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pattern: Pattern::default(),
            checker_size: 16,
            limit: None,
            sequence: 0,
        }
    }

    /// Set the pattern.
    pub fn with_pattern(mut self, pattern: Pattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Stop after `count` frames.
    pub fn with_limit(mut self, count: u64) -> Self {
        self.limit = Some(count);
        self
    }

    /// Frames produced so far.
    pub fn frames_produced(&self) -> u64 {
        self.sequence
    }

    /// Draw frame number `index` without advancing the source.
    pub fn render(&self, index: u64) -> RgbImage {
        let mut image = RgbImage::filled(self.width, self.height, [0, 0, 0]);
        match self.pattern {
            Pattern::SweepingBars => self.fill_bars(image.data_mut(), index),
            Pattern::Checkerboard => self.fill_checkerboard(image.data_mut(), index),
            Pattern::Solid(rgb) => {
                for pixel in image.data_mut().chunks_exact_mut(3) {
                    pixel.copy_from_slice(&rgb);
                }
            }
            Pattern::Noise => fill_noise(image.data_mut(), index),
        }
        image
    }

    fn fill_bars(&self, data: &mut [u8], index: u64) {
        // 75% SMPTE bars
        const BARS: [[u8; 3]; 7] = [
            [191, 191, 191],
            [191, 191, 0],
            [0, 191, 191],
            [0, 191, 0],
            [191, 0, 191],
            [191, 0, 0],
            [0, 0, 191],
        ];
        let bar_width = (self.width / 7).max(1);
        let sweep_width = (self.width / 32).max(2);
        let sweep_x = ((index * 4) % self.width.max(1) as u64) as u32;

        for (i, pixel) in data.chunks_exact_mut(3).enumerate() {
            let x = i as u32 % self.width;
            let rgb = if x >= sweep_x && x < sweep_x + sweep_width {
                [255, 255, 255]
            } else {
                BARS[(x / bar_width).min(6) as usize]
            };
            pixel.copy_from_slice(&rgb);
        }
    }

    fn fill_checkerboard(&self, data: &mut [u8], index: u64) {
        let size = self.checker_size.max(1);
        let shift = index as u32;
        for (i, pixel) in data.chunks_exact_mut(3).enumerate() {
            let x = i as u32 % self.width;
            let y = i as u32 / self.width;
            let white = (x / size + y / size + shift) % 2 == 0;
            pixel.copy_from_slice(if white { &[255; 3] } else { &[0; 3] });
        }
    }
}

/// Xorshift64 seeded from the frame index.
fn fill_noise(data: &mut [u8], index: u64) {
    let mut state = (index + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    for byte in data {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        *byte = (state >> 24) as u8;
    }
}

impl FrameSource for PatternSource {
    fn capture_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.limit.is_some_and(|limit| self.sequence >= limit) {
            return Ok(None);
        }
        let image = self.render(self.sequence);
        self.sequence += 1;
        Ok(Some(image))
    }
}
