//! Raw video frames.
//!
//! - [`Frame`]: what the caller hands to [`Recorder::write`](crate::Recorder::write),
//!   borrowed for a single call.
//! - [`RgbImage`]: an owned interleaved RGB picture, as produced by a capture source.
//! - [`FrameBuffer`]: the recorder's reusable planar I420 image.
//! - [`PlanarFrame`]: a borrowed planar view handed to the encoder.

use crate::error::{Error, Result};

/// Row alignment of [`FrameBuffer`] planes, in bytes.
pub const STRIDE_ALIGN: usize = 32;

#[inline]
fn align_up(n: usize, align: usize) -> usize {
    n.div_ceil(align) * align
}

// ============================================================================
// Caller-facing frames
// ============================================================================

/// One raw video frame.
#[derive(Debug, Clone, Copy)]
pub enum Frame<'a> {
    /// Planar YUV 4:2:0 at the recorder's resolution, with tightly packed
    /// rows (`width`, `width / 2`, `width / 2`).
    Yuv {
        /// Luma plane, `width * height` bytes.
        y: &'a [u8],
        /// Cb plane, `width * height / 4` bytes.
        u: &'a [u8],
        /// Cr plane, `width * height / 4` bytes.
        v: &'a [u8],
    },
    /// Interleaved 8-bit RGB of any size. It is scaled to the recorder's
    /// resolution if needed.
    Rgb {
        /// Pixel data, `3 * width * height` bytes.
        data: &'a [u8],
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
    },
}

impl<'a> Frame<'a> {
    /// Planar YUV frame.
    pub fn yuv(y: &'a [u8], u: &'a [u8], v: &'a [u8]) -> Self {
        Frame::Yuv { y, u, v }
    }

    /// Interleaved RGB frame.
    pub fn rgb(data: &'a [u8], width: u32, height: u32) -> Self {
        Frame::Rgb {
            data,
            width,
            height,
        }
    }

    /// Whether the frame needs colour conversion before encoding.
    pub fn is_rgb(&self) -> bool {
        matches!(self, Frame::Rgb { .. })
    }
}

impl<'a> From<&'a RgbImage> for Frame<'a> {
    fn from(image: &'a RgbImage) -> Self {
        Frame::rgb(&image.data, image.width, image.height)
    }
}

/// An owned interleaved RGB image.
#[derive(Clone, PartialEq, Eq)]
pub struct RgbImage {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl RgbImage {
    /// Wrap existing pixel data.
    ///
    /// Fails with [`Error::InvalidFrame`] if `data` is not `3 * width * height` bytes.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = 3 * width as usize * height as usize;
        if data.len() != expected {
            return Err(Error::InvalidFrame(format!(
                "RGB image {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// An image filled with one colour.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * 3);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel data.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable pixel data.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Consume the image, returning its pixel data.
    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }
}

impl std::fmt::Debug for RgbImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RgbImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("len", &self.data.len())
            .finish()
    }
}

// ============================================================================
// Planar view
// ============================================================================

/// A borrowed planar I420 image with explicit strides and a presentation
/// timestamp in the encoder time base.
#[derive(Debug, Clone, Copy)]
pub struct PlanarFrame<'a> {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Row strides of the Y, U and V planes.
    pub strides: (usize, usize, usize),
    /// Luma plane.
    pub y: &'a [u8],
    /// Cb plane.
    pub u: &'a [u8],
    /// Cr plane.
    pub v: &'a [u8],
    /// Presentation timestamp.
    pub pts: i64,
}

impl<'a> PlanarFrame<'a> {
    /// View tightly packed planes, checking their sizes against `width` x `height`.
    pub fn packed(width: u32, height: u32, y: &'a [u8], u: &'a [u8], v: &'a [u8]) -> Result<Self> {
        let w = width as usize;
        let h = height as usize;
        let luma = w * h;
        let chroma = (w / 2) * (h / 2);

        if y.len() != luma {
            return Err(Error::InvalidFrame(format!(
                "Y plane has {} bytes, expected {} for {}x{}",
                y.len(),
                luma,
                width,
                height
            )));
        }
        if u.len() != chroma || v.len() != chroma {
            return Err(Error::InvalidFrame(format!(
                "chroma planes have {}/{} bytes, expected {}",
                u.len(),
                v.len(),
                chroma
            )));
        }

        Ok(Self {
            width,
            height,
            strides: (w, w / 2, w / 2),
            y,
            u,
            v,
            pts: 0,
        })
    }

    /// Set the presentation timestamp.
    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = pts;
        self
    }

    /// Luma sample at `(x, y)`.
    pub fn luma(&self, x: usize, y: usize) -> u8 {
        self.y[y * self.strides.0 + x]
    }

    /// Chroma samples `(u, v)` at chroma coordinates `(x, y)`.
    pub fn chroma(&self, x: usize, y: usize) -> (u8, u8) {
        (
            self.u[y * self.strides.1 + x],
            self.v[y * self.strides.2 + x],
        )
    }
}

// ============================================================================
// Frame Buffer
// ============================================================================

/// A reusable planar I420 image owned by the recorder.
///
/// Plane rows are padded to [`STRIDE_ALIGN`] bytes.
pub struct FrameBuffer {
    width: u32,
    height: u32,
    y_stride: usize,
    uv_stride: usize,
    y: Vec<u8>,
    u: Vec<u8>,
    v: Vec<u8>,
}

impl FrameBuffer {
    /// Allocate a buffer for `width` x `height` pixels (both even).
    ///
    /// Fails with [`Error::Conversion`] if the planes cannot be allocated.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(Error::InvalidParameter(format!(
                "frame buffer needs even, non-zero dimensions, got {}x{}",
                width, height
            )));
        }

        let w = width as usize;
        let h = height as usize;
        let y_stride = align_up(w, STRIDE_ALIGN);
        let uv_stride = align_up(w / 2, STRIDE_ALIGN);

        Ok(Self {
            width,
            height,
            y_stride,
            uv_stride,
            y: alloc_plane(y_stride * h, 16)?,
            u: alloc_plane(uv_stride * (h / 2), 128)?,
            v: alloc_plane(uv_stride * (h / 2), 128)?,
        })
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row strides of the Y, U and V planes.
    pub fn strides(&self) -> (usize, usize, usize) {
        (self.y_stride, self.uv_stride, self.uv_stride)
    }

    /// Mutable access to all three planes at once.
    pub fn planes_mut(&mut self) -> (&mut [u8], &mut [u8], &mut [u8]) {
        (&mut self.y, &mut self.u, &mut self.v)
    }

    /// Borrow the buffer as a planar frame.
    pub fn as_planar(&self) -> PlanarFrame<'_> {
        PlanarFrame {
            width: self.width,
            height: self.height,
            strides: self.strides(),
            y: &self.y,
            u: &self.u,
            v: &self.v,
            pts: 0,
        }
    }

    /// Fill every sample with a constant colour.
    pub fn fill(&mut self, y: u8, u: u8, v: u8) {
        self.y.fill(y);
        self.u.fill(u);
        self.v.fill(v);
    }
}

fn alloc_plane(len: usize, value: u8) -> Result<Vec<u8>> {
    let mut plane = Vec::new();
    plane
        .try_reserve_exact(len)
        .map_err(|e| Error::Conversion(format!("cannot allocate {} byte plane: {}", len, e)))?;
    plane.resize(len, value);
    Ok(plane)
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("y_stride", &self.y_stride)
            .field("uv_stride", &self.uv_stride)
            .finish()
    }
}
