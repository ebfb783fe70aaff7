//! # Recorda
//!
//! Frame-by-frame H.264 video recording into AVI, Matroska and MP4 files.
//!
//! A [`Recorder`] takes raw frames one at a time, either packed 8-bit RGB
//! or planar YUV 4:2:0, converts and scales them to the output geometry,
//! encodes them, and multiplexes the packets into a single-stream container.
//!
//! ## Features
//!
//! - **Three containers**: RIFF/AVI, Matroska (EBML) and MP4 with faststart
//! - **Decoupled encoding**: submit/drain engine interface with full flush on close
//! - **BT.601 conversion**: RGB24 to I420 with bicubic scaling
//! - **Capture loop**: fixed-interval worker pulling from any [`FrameSource`]
//! - **Observability**: `tracing` spans and `metrics` counters per recording
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use recorda::prelude::*;
//!
//! # fn main() -> recorda::Result<()> {
//! let mut recorder = Recorder::new(OutputFormat::Mkv, CodecType::H264)?;
//! recorder.open("screen.mkv", 640, 480, 25)?;
//!
//! let mut source = PatternSource::new(640, 480).with_limit(50);
//! while let Some(image) = source.capture_frame()? {
//!     recorder.write(Frame::from(&image))?;
//! }
//! recorder.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod capture;
pub mod codec;
pub mod config;
pub mod converters;
pub mod error;
pub mod format;
pub mod frame;
pub mod mux;
pub mod observability;
pub mod recorder;
pub mod temporal;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::capture::{CaptureLoop, FrameSource, Pattern, PatternSource};
    pub use crate::config::{CodecConfig, ConverterConfig, FormatOptions, RecorderConfig};
    pub use crate::error::{Error, Result};
    pub use crate::format::{CodecType, OutputFormat};
    pub use crate::frame::{Frame, RgbImage};
    pub use crate::recorder::{Recorder, RecorderState, RecordingStats};
}

pub use config::{CodecConfig, ConverterConfig, FormatOptions, ParameterSets, RecorderConfig};
pub use error::{Error, Result};
pub use format::{CodecType, OutputFormat};
pub use frame::{Frame, RgbImage};
pub use recorder::{Recorder, RecorderState, RecordingStats};
