//! The recording session.
//!
//! A [`Recorder`] owns one encoder engine and one muxer and drives them
//! through a strict lifecycle:
//!
//! ```text
//!            open()              close() / drop
//! Created ───────────▶ Open ─────────────────────▶ Closed
//!    ▲  │                │ ▲
//!    └──┘ open failed    └─┘ write()
//! ```
//!
//! `Closed` is terminal. Every `write` stamps the frame with the next
//! counter value, submits it, and drains whatever the encoder has ready
//! into the container. `close` flushes the encoder, drains it to the end,
//! and writes the trailer exactly once.
//!
//! # Example
//!
//! ```rust,no_run
//! use recorda::{CodecType, OutputFormat, Recorder};
//!
//! # fn main() -> recorda::Result<()> {
//! let mut recorder = Recorder::new(OutputFormat::Mp4, CodecType::H264)?;
//! recorder.open("capture.mp4", 1280, 720, 30)?;
//!
//! let white = vec![255u8; 1920 * 1080 * 3];
//! for _ in 0..30 {
//!     recorder.write_rgb(&white, 1920, 1080)?;
//! }
//! recorder.close()?;
//! # Ok(())
//! # }
//! ```

use std::mem;
use std::path::{Path, PathBuf};

use crate::codec::{self, EncoderEngine, Submit};
use crate::config::{FormatOptions, RecorderConfig};
use crate::converters::ColorConverter;
use crate::error::{Error, Result};
use crate::format::{CodecType, OutputFormat};
use crate::frame::{Frame, FrameBuffer, PlanarFrame};
use crate::mux::{self, Muxer, Stream};
use crate::observability::{
    RecordingMetrics, span_recording, trace_drain, trace_packet, trace_state_change,
};
use crate::temporal::TimeBase;

/// Lifecycle state of a [`Recorder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RecorderState {
    /// Constructed, or a previous `open` failed.
    #[default]
    Created,
    /// Accepting frames.
    Open,
    /// Finished. A closed recorder cannot be reopened.
    Closed,
}

impl std::fmt::Display for RecorderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Open => write!(f, "Open"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// Counters for the current (or last) recording.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordingStats {
    /// Frames submitted to the encoder.
    pub frames: u64,
    /// Packets written to the container.
    pub packets: u64,
    /// Compressed bytes written to the container.
    pub bytes: u64,
    /// Keyframe packets written to the container.
    pub keyframes: u64,
}

/// Everything bound at `open`.
struct Session {
    sink: PathBuf,
    width: u32,
    height: u32,
    frame_rate: u32,
    encoder_time_base: TimeBase,
    stream: Stream,
    buffer: FrameBuffer,
}

/// Keep `err` if it already has the variant `kind` builds, otherwise wrap its message.
fn wrap(err: Error, kind: fn(String) -> Error) -> Error {
    if mem::discriminant(&err) == mem::discriminant(&kind(String::new())) {
        err
    } else {
        kind(err.to_string())
    }
}

/// Submit, drain and mux failures surface as [`Error::Encode`], except
/// for frame validation errors the caller can fix.
fn encode_error(err: Error) -> Error {
    match err {
        Error::Encode(_) | Error::InvalidFrame(_) | Error::InvalidStream { .. } => err,
        other => Error::Encode(other.to_string()),
    }
}

/// Move every packet the engine has ready into the muxer.
///
/// Returns the number of packets muxed and whether the engine reported end
/// of stream.
fn drain_into(
    engine: &mut dyn EncoderEngine,
    muxer: &mut dyn Muxer,
    session: &Session,
    stats: &mut RecordingStats,
    metrics: &RecordingMetrics,
) -> Result<(usize, bool)> {
    let mut muxed = 0;
    let mut drain = engine.drain();

    for packet in drain.by_ref() {
        let packet = packet
            .map_err(encode_error)?
            .rescale(session.encoder_time_base, session.stream.time_base)
            .with_stream_index(session.stream.index);
        let (len, keyframe) = (packet.len(), packet.keyframe);
        trace_packet(packet.pts, packet.dts, len, keyframe);

        muxer.write_packet(packet).map_err(encode_error)?;

        stats.packets += 1;
        stats.bytes += len as u64;
        stats.keyframes += u64::from(keyframe);
        metrics.record_packet(len, keyframe);
        muxed += 1;
    }

    let end_of_stream = drain.reached_end_of_stream();
    if muxed > 0 || end_of_stream {
        trace_drain(metrics.format(), muxed, end_of_stream);
    }
    Ok((muxed, end_of_stream))
}

/// A frame-by-frame video recorder writing one container file.
///
/// All operations take `&mut self`; a recorder is used from one thread at
/// a time but may be moved between threads.
pub struct Recorder {
    format: OutputFormat,
    codec: CodecType,
    config: RecorderConfig,
    format_options: FormatOptions,
    state: RecorderState,
    engine: Box<dyn EncoderEngine>,
    muxer: Box<dyn Muxer>,
    converter: ColorConverter,
    session: Option<Session>,
    geometry: Option<(u32, u32, u32)>,
    frame_counter: i64,
    stats: RecordingStats,
    metrics: RecordingMetrics,
}

impl Recorder {
    /// Create a recorder with the default configuration.
    ///
    /// Fails with [`Error::Configuration`] if the codec cannot be stored in
    /// the container. Nothing is allocated until [`open`](Self::open).
    pub fn new(format: OutputFormat, codec: CodecType) -> Result<Self> {
        Self::with_config(format, codec, RecorderConfig::default())
    }

    /// Create a recorder with custom encoder, container and converter settings.
    pub fn with_config(format: OutputFormat, codec: CodecType, config: RecorderConfig) -> Result<Self> {
        codec
            .check_container(format)
            .map_err(|e| wrap(e, Error::Configuration))?;
        let muxer = mux::muxer_for(format)?;
        let mut recorder = Self::with_backends(format, codec::engine_for(codec), muxer, config)?;
        recorder.codec = codec;
        Ok(recorder)
    }

    /// Create a recorder around existing engine and muxer implementations.
    ///
    /// Fails with [`Error::Configuration`] if the muxer writes a different
    /// format.
    pub fn with_backends(
        format: OutputFormat,
        engine: Box<dyn EncoderEngine>,
        muxer: Box<dyn Muxer>,
        config: RecorderConfig,
    ) -> Result<Self> {
        if muxer.format() != format {
            return Err(Error::Configuration(format!(
                "muxer writes {} but the recorder was asked for {}",
                muxer.format(),
                format
            )));
        }

        let format_options = config
            .format_options
            .clone()
            .unwrap_or_else(|| FormatOptions::for_format(format));

        Ok(Self {
            format,
            codec: CodecType::H264,
            converter: ColorConverter::new(config.converter),
            config,
            format_options,
            state: RecorderState::Created,
            engine,
            muxer,
            session: None,
            geometry: None,
            frame_counter: 0,
            stats: RecordingStats::default(),
            metrics: RecordingMetrics::new(format.format_name()),
        })
    }

    /// Open the encoder and the container file.
    ///
    /// `width` and `height` must be even and non-zero, `frame_rate` non-zero.
    /// On failure everything acquired so far is released and the recorder
    /// stays [`Created`](RecorderState::Created).
    pub fn open(
        &mut self,
        sink: impl AsRef<Path>,
        width: u32,
        height: u32,
        frame_rate: u32,
    ) -> Result<()> {
        match self.state {
            RecorderState::Open => return Err(Error::AlreadyOpen),
            RecorderState::Closed => return Err(Error::AlreadyClosed),
            RecorderState::Created => {}
        }
        if frame_rate == 0 {
            return Err(Error::InvalidParameter(
                "frame rate must be greater than zero".to_string(),
            ));
        }
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(Error::InvalidParameter(format!(
                "dimensions must be even and non-zero, got {}x{}",
                width, height
            )));
        }

        let sink = sink.as_ref();
        let _span = span_recording(self.format.format_name(), sink).entered();

        let mut header_written = false;
        match self.try_open(sink, width, height, frame_rate, &mut header_written) {
            Ok(session) => {
                tracing::info!(
                    width,
                    height,
                    frame_rate,
                    encoder_time_base = %session.encoder_time_base,
                    stream_time_base = %session.stream.time_base,
                    "Recording opened"
                );
                self.session = Some(session);
                self.geometry = Some((width, height, frame_rate));
                self.frame_counter = 0;
                self.stats = RecordingStats::default();
                self.set_state(RecorderState::Open);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to open recording");
                self.engine.close();
                self.muxer.release();
                if header_written {
                    if let Err(rm) = std::fs::remove_file(sink) {
                        tracing::debug!(error = %rm, "Could not remove partial file");
                    }
                }
                Err(e)
            }
        }
    }

    fn try_open(
        &mut self,
        sink: &Path,
        width: u32,
        height: u32,
        frame_rate: u32,
        header_written: &mut bool,
    ) -> Result<Session> {
        let encoder_time_base = TimeBase::from_frame_rate(frame_rate).ok_or_else(|| {
            Error::InvalidParameter("frame rate must be greater than zero".to_string())
        })?;

        let params = self
            .engine
            .open(&self.config.codec, width, height, encoder_time_base)
            .map_err(|e| wrap(e, Error::EncoderOpen))?;

        let stream = self
            .muxer
            .add_video_stream(&params)
            .map_err(|e| wrap(e, Error::StreamCreation))?;
        mux::dump_format(self.format, sink, &stream);

        self.muxer
            .write_header(sink, &self.format_options)
            .map_err(|e| wrap(e, Error::ContainerHeader))?;
        *header_written = true;

        let buffer = FrameBuffer::new(width, height).map_err(|e| wrap(e, Error::Conversion))?;

        Ok(Session {
            sink: sink.to_path_buf(),
            width,
            height,
            frame_rate,
            encoder_time_base,
            stream,
            buffer,
        })
    }

    /// Encode one frame and mux whatever the encoder has ready.
    ///
    /// Returns the number of packets written to the container by this call,
    /// which may be zero while the encoder buffers.
    pub fn write(&mut self, frame: Frame<'_>) -> Result<usize> {
        if self.state != RecorderState::Open {
            return Err(Error::NotOpen(format!("recorder is {}", self.state)));
        }
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::NotOpen("recorder has no session".to_string()))?;
        let _timer = self.metrics.start_timer();

        // The timestamp is only consumed once the encoder accepts the frame.
        let pts = self.frame_counter;
        let planar = match frame {
            Frame::Yuv { y, u, v } => {
                PlanarFrame::packed(session.width, session.height, y, u, v)?
            }
            Frame::Rgb {
                data,
                width,
                height,
            } => {
                self.converter
                    .convert(data, width, height, &mut session.buffer)?;
                session.buffer.as_planar()
            }
        }
        .with_pts(pts);

        let session = &*session;
        let engine = self.engine.as_mut();
        let muxer = self.muxer.as_mut();
        let mut muxed = 0;

        if engine.submit(&planar).map_err(encode_error)? == Submit::Rejected {
            let (count, _) = drain_into(engine, muxer, session, &mut self.stats, &self.metrics)?;
            muxed += count;
            if engine.submit(&planar).map_err(encode_error)? == Submit::Rejected {
                return Err(Error::Encode(
                    "encoder rejected the frame after draining".to_string(),
                ));
            }
        }
        self.frame_counter += 1;
        self.stats.frames += 1;
        self.metrics.record_frame();

        let (count, _) = drain_into(engine, muxer, session, &mut self.stats, &self.metrics)?;
        Ok(muxed + count)
    }

    /// Write a planar YUV 4:2:0 frame at the recorder's resolution.
    pub fn write_yuv(&mut self, y: &[u8], u: &[u8], v: &[u8]) -> Result<usize> {
        self.write(Frame::yuv(y, u, v))
    }

    /// Write an interleaved RGB frame of any size.
    pub fn write_rgb(&mut self, data: &[u8], width: u32, height: u32) -> Result<usize> {
        self.write(Frame::rgb(data, width, height))
    }

    /// Flush the encoder, write the trailer and release everything.
    ///
    /// A no-op unless the recorder is open. The recorder always ends up
    /// [`Closed`](RecorderState::Closed); the first failure is returned.
    pub fn close(&mut self) -> Result<()> {
        if self.state != RecorderState::Open {
            return Ok(());
        }
        let session = self.session.take();
        let sink = session.as_ref().map(|s| s.sink.clone()).unwrap_or_default();
        let _span = span_recording(self.format.format_name(), &sink).entered();

        let mut first_error = match &session {
            Some(session) => self.finish_stream(session).err(),
            None => None,
        };
        if let Err(e) = self.muxer.write_trailer() {
            first_error.get_or_insert(wrap(e, Error::TrailerWrite));
        }

        self.muxer.release();
        self.engine.close();
        self.set_state(RecorderState::Closed);

        tracing::info!(
            frames = self.stats.frames,
            packets = self.stats.packets,
            bytes = self.stats.bytes,
            keyframes = self.stats.keyframes,
            "Recording closed"
        );
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Signal end of stream and drain until the engine has nothing left.
    fn finish_stream(&mut self, session: &Session) -> Result<()> {
        self.engine.flush().map_err(encode_error)?;
        loop {
            let (count, end_of_stream) = drain_into(
                self.engine.as_mut(),
                self.muxer.as_mut(),
                session,
                &mut self.stats,
                &self.metrics,
            )?;
            if end_of_stream {
                return Ok(());
            }
            if count == 0 {
                return Err(Error::Encode(
                    "encoder stopped producing packets before end of stream".to_string(),
                ));
            }
        }
    }

    fn set_state(&mut self, state: RecorderState) {
        trace_state_change(
            self.format.format_name(),
            &self.state.to_string(),
            &state.to_string(),
        );
        self.state = state;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// Frames accepted by the encoder since the last successful `open`.
    pub fn frames_written(&self) -> u64 {
        self.frame_counter as u64
    }

    /// Container format.
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Video codec.
    pub fn codec(&self) -> CodecType {
        self.codec
    }

    /// Width and height bound by the last successful `open`.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.geometry.map(|(w, h, _)| (w, h))
    }

    /// Frame rate bound by the last successful `open`.
    pub fn frame_rate(&self) -> Option<u32> {
        self.geometry.map(|(_, _, fps)| fps)
    }

    /// Counters for the current or last recording.
    pub fn stats(&self) -> RecordingStats {
        self.stats
    }

    /// Container options the header is written with.
    pub fn format_options(&self) -> &FormatOptions {
        &self.format_options
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.state != RecorderState::Open {
            return;
        }
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "Failed to close recording on drop");
        }
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("format", &self.format)
            .field("codec", &self.codec)
            .field("state", &self.state)
            .field("engine", &self.engine.name())
            .field("geometry", &self.geometry)
            .field("frames", &self.frame_counter)
            .field("stats", &self.stats)
            .finish()
    }
}
