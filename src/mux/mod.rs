//! Container multiplexers.
//!
//! A [`Muxer`] owns one output file with exactly one video stream:
//!
//! ```text
//! add_video_stream → write_header → write_packet* → write_trailer → release
//! ```
//!
//! Each format is a [`ContainerWriter`] over any `Write + Seek` sink; the
//! file-backed [`FileMuxer`] drives one of them through the lifecycle above.
//!
//! | Format | Writer | Bitstream |
//! |--------|--------|-----------|
//! | AVI | [`AviWriter`] (RIFF) | Annex-B |
//! | Matroska | [`MatroskaWriter`] (EBML) | AVCC + `avcC` CodecPrivate |
//! | MP4 | [`Mp4FileWriter`] (`mp4` crate) | AVCC + `avcC` |

mod avi;
pub mod faststart;
mod matroska;
mod mp4;

pub use avi::AviWriter;
pub use matroska::MatroskaWriter;
pub use mp4::Mp4FileWriter;

use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use crate::codec::{CodecParameters, Packet};
use crate::config::FormatOptions;
use crate::error::{Error, Result};
use crate::format::OutputFormat;
use crate::temporal::TimeBase;

// ============================================================================
// Stream
// ============================================================================

/// The container's video stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    /// Index packets must carry.
    pub index: usize,
    /// Time base of packet timestamps inside the container.
    pub time_base: TimeBase,
    /// Codec parameters the stream was created from.
    pub params: CodecParameters,
}

/// Log a one-line summary of the output, like a media tool's format dump.
pub fn dump_format(format: OutputFormat, sink: &Path, stream: &Stream) {
    let p = &stream.params;
    tracing::info!(
        "Output #0, {}, to '{}': Stream #0:{}: Video: {} ({}) {}x{}, {} kb/s, {} fps, {} tbn",
        format.format_name(),
        sink.display(),
        stream.index,
        p.codec.name(),
        p.profile_name().unwrap_or("unknown profile"),
        p.width,
        p.height,
        p.bit_rate / 1000,
        p.frame_rate,
        stream.time_base
    );
}

// ============================================================================
// Muxer trait
// ============================================================================

/// A container writer bound to one output file.
pub trait Muxer: Send {
    /// Container format.
    fn format(&self) -> OutputFormat;

    /// Create the single video stream. A second call fails with
    /// [`Error::StreamCreation`].
    fn add_video_stream(&mut self, params: &CodecParameters) -> Result<Stream>;

    /// The stream, once created.
    fn stream(&self) -> Option<&Stream>;

    /// Create `sink` and write the container header with format options.
    fn write_header(&mut self, sink: &Path, options: &FormatOptions) -> Result<()>;

    /// Write one packet. Timestamps are in the stream time base.
    fn write_packet(&mut self, packet: Packet) -> Result<()>;

    /// Finish the file. Only the first call after the header does anything.
    fn write_trailer(&mut self) -> Result<()>;

    /// Drop the sink and the stream, returning to the initial state.
    fn release(&mut self);
}

/// One container format over a seekable sink.
pub trait ContainerWriter<W: Write + Seek>: Sized + Send {
    /// Format this writer produces.
    const FORMAT: OutputFormat;

    /// Time base the container stores timestamps in.
    fn stream_time_base(params: &CodecParameters) -> TimeBase;

    /// Write the header.
    fn start(sink: W, stream: &Stream, options: &FormatOptions) -> Result<Self>;

    /// Append one packet.
    fn write_packet(&mut self, packet: Packet) -> Result<()>;

    /// Write the trailer and hand the sink back.
    fn finish(self) -> Result<W>;

    /// Post-process the finished file.
    fn finalize_file(_file: &mut File, _options: &FormatOptions) -> Result<()> {
        Ok(())
    }
}

/// Smallest `fps * 2^n` that is at least 10000, for MP4 track timescales.
pub fn mp4_timescale(frame_rate: u32) -> u32 {
    let mut timescale = frame_rate.max(1);
    while timescale < 10_000 {
        match timescale.checked_mul(2) {
            Some(next) => timescale = next,
            None => break,
        }
    }
    timescale
}

// ============================================================================
// File muxer
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Writing,
    Finished,
}

/// Muxer writing one [`ContainerWriter`] format to a file.
pub struct FileMuxer<C> {
    stream: Option<Stream>,
    writer: Option<C>,
    options: FormatOptions,
    sink: Option<PathBuf>,
    phase: Phase,
    _format: PhantomData<fn() -> C>,
}

/// AVI file muxer.
pub type AviMuxer = FileMuxer<AviWriter<BufWriter<File>>>;
/// Matroska file muxer.
pub type MatroskaMuxer = FileMuxer<MatroskaWriter<BufWriter<File>>>;
/// MP4 file muxer.
pub type Mp4Muxer = FileMuxer<Mp4FileWriter<BufWriter<File>>>;

impl<C> FileMuxer<C> {
    /// Create an idle muxer.
    pub fn new() -> Self {
        Self {
            stream: None,
            writer: None,
            options: FormatOptions::default(),
            sink: None,
            phase: Phase::Created,
            _format: PhantomData,
        }
    }

    /// Path of the current sink.
    pub fn sink(&self) -> Option<&Path> {
        self.sink.as_deref()
    }
}

impl<C> Default for FileMuxer<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ContainerWriter<BufWriter<File>>> Muxer for FileMuxer<C> {
    fn format(&self) -> OutputFormat {
        C::FORMAT
    }

    fn add_video_stream(&mut self, params: &CodecParameters) -> Result<Stream> {
        if self.stream.is_some() {
            return Err(Error::StreamCreation(
                "container already has a video stream".to_string(),
            ));
        }
        if params.width == 0 || params.height == 0 {
            return Err(Error::StreamCreation(format!(
                "invalid stream size {}x{}",
                params.width, params.height
            )));
        }

        let stream = Stream {
            index: 0,
            time_base: C::stream_time_base(params),
            params: params.clone(),
        };
        self.stream = Some(stream.clone());
        Ok(stream)
    }

    fn stream(&self) -> Option<&Stream> {
        self.stream.as_ref()
    }

    fn write_header(&mut self, sink: &Path, options: &FormatOptions) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| Error::ContainerHeader("no stream has been added".to_string()))?;
        if self.phase != Phase::Created {
            return Err(Error::ContainerHeader(
                "header has already been written".to_string(),
            ));
        }

        let file = File::create(sink).map_err(|e| {
            Error::ContainerHeader(format!("cannot create '{}': {}", sink.display(), e))
        })?;
        let writer = match C::start(BufWriter::new(file), stream, options) {
            Ok(writer) => writer,
            Err(e) => {
                if let Err(remove) = std::fs::remove_file(sink) {
                    tracing::debug!(error = %remove, "Failed to remove '{}'", sink.display());
                }
                return Err(e);
            }
        };

        self.writer = Some(writer);
        self.options = options.clone();
        self.sink = Some(sink.to_path_buf());
        self.phase = Phase::Writing;
        Ok(())
    }

    fn write_packet(&mut self, packet: Packet) -> Result<()> {
        let available = usize::from(self.stream.is_some());
        let writer = match (self.phase, self.writer.as_mut()) {
            (Phase::Writing, Some(writer)) => writer,
            (Phase::Finished, _) => {
                return Err(Error::NotOpen("trailer has already been written".to_string()));
            }
            _ => return Err(Error::NotOpen("header has not been written".to_string())),
        };
        if packet.stream_index >= available {
            return Err(Error::InvalidStream {
                index: packet.stream_index,
                available,
            });
        }
        writer.write_packet(packet)
    }

    fn write_trailer(&mut self) -> Result<()> {
        match self.phase {
            Phase::Finished => return Ok(()),
            Phase::Created => {
                return Err(Error::NotOpen("header has not been written".to_string()));
            }
            Phase::Writing => {}
        }
        self.phase = Phase::Finished;

        let writer = self
            .writer
            .take()
            .ok_or_else(|| Error::TrailerWrite("container writer is gone".to_string()))?;
        let sink = writer
            .finish()
            .map_err(|e| Error::TrailerWrite(e.to_string()))?;
        let mut file = sink
            .into_inner()
            .map_err(|e| Error::TrailerWrite(format!("flush failed: {}", e.error())))?;
        C::finalize_file(&mut file, &self.options)?;
        file.sync_data()?;
        Ok(())
    }

    fn release(&mut self) {
        self.writer = None;
        self.stream = None;
        self.sink = None;
        self.phase = Phase::Created;
    }
}

impl<C> std::fmt::Debug for FileMuxer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileMuxer")
            .field("stream", &self.stream)
            .field("sink", &self.sink)
            .field("phase", &self.phase)
            .finish()
    }
}

/// Create a muxer from a format identifier (`"avi"`, `"matroska"`, `"mp4"`).
pub fn muxer_by_name(name: &str) -> Result<Box<dyn Muxer>> {
    match name {
        "avi" => Ok(Box::new(AviMuxer::new())),
        "matroska" => Ok(Box::new(MatroskaMuxer::new())),
        "mp4" => Ok(Box::new(Mp4Muxer::new())),
        other => Err(Error::UnsupportedFormat(other.to_string())),
    }
}

/// Create the muxer for a format.
pub fn muxer_for(format: OutputFormat) -> Result<Box<dyn Muxer>> {
    muxer_by_name(format.format_name())
}
