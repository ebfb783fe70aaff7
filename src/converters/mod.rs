//! Colour conversion for captured frames.
//!
//! Pure Rust RGB to planar YUV 4:2:0 conversion with optional resampling.
//!
//! - [`ColorConverter`]: RGB of any size to an I420 [`FrameBuffer`](crate::frame::FrameBuffer),
//!   caching one [`ScaleContext`] per source/destination size pair
//! - [`ScaleContext`]: separable fixed-point resampler (nearest, bilinear, bicubic)
//!
//! # Example
//!
//! ```rust
//! use recorda::converters::ColorConverter;
//! use recorda::frame::FrameBuffer;
//!
//! let mut converter = ColorConverter::default();
//! let mut buffer = FrameBuffer::new(256, 256)?;
//!
//! let white = vec![255u8; 640 * 480 * 3];
//! converter.convert(&white, 640, 480, &mut buffer)?;
//! assert_eq!(buffer.as_planar().luma(0, 0), 235);
//! # Ok::<(), recorda::Error>(())
//! ```

mod colorspace;
mod scale;

pub use colorspace::{ColorConverter, ColorMatrix, ColorRange, YuvCoefficients, rgb24_to_i420};
pub use scale::{ScaleAlgorithm, ScaleContext};
