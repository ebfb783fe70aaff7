//! MP4 container writer on top of the `mp4` crate.
//!
//! Samples are stored as AVCC with an `avcC` sample description. The track
//! timescale is a power-of-two multiple of the frame rate so one frame is a
//! whole number of ticks. `stts` durations come from decode timestamp deltas,
//! so each sample is held back until the next one arrives.
//!
//! After the file is closed, [`finalize_file`](ContainerWriter::finalize_file)
//! appends the writing application and optionally relocates `moov` in front
//! of `mdat` (see [`faststart`](super::faststart)).

use std::fs::File;
use std::io::{Seek, Write};

use mp4::{
    AvcConfig, FourCC, MediaConfig, Mp4Config, Mp4Sample, Mp4Writer, TrackConfig, TrackType,
};

use crate::codec::{CodecParameters, Packet, nal};
use crate::config::FormatOptions;
use crate::error::{Error, Result};
use crate::format::OutputFormat;
use crate::temporal::TimeBase;

use super::{ContainerWriter, Stream, faststart, mp4_timescale};

const TRACK_ID: u32 = 1;
const MOVIE_TIMESCALE: u32 = 1000;
const DEFAULT_BRAND: &str = "isom";
const COMPATIBLE_BRANDS: [&str; 4] = ["isom", "iso2", "avc1", "mp41"];

/// MP4 writer over any seekable sink.
pub struct Mp4FileWriter<W: Write + Seek> {
    writer: Mp4Writer<W>,
    pending: Option<Packet>,
    samples: u64,
    bytes: u64,
}

fn brand(name: &str) -> Result<FourCC> {
    name.parse()
        .map_err(|_| Error::ContainerHeader(format!("invalid MP4 brand '{}'", name)))
}

impl<W: Write + Seek> Mp4FileWriter<W> {
    fn write_sample(&mut self, packet: Packet, duration: i64) -> Result<()> {
        let dts = u64::try_from(packet.dts).map_err(|_| {
            Error::Encode(format!("negative decode timestamp {} in MP4 track", packet.dts))
        })?;
        let duration = u32::try_from(duration)
            .map_err(|_| Error::Encode(format!("sample duration {} out of range", duration)))?;
        let rendering_offset = i32::try_from(packet.pts - packet.dts)
            .map_err(|_| Error::Encode("composition offset out of range".to_string()))?;

        let sample = Mp4Sample {
            start_time: dts,
            duration,
            rendering_offset,
            is_sync: packet.keyframe,
            bytes: nal::annex_b_to_avcc(&packet.data).into(),
        };
        self.writer
            .write_sample(TRACK_ID, &sample)
            .map_err(|e| Error::Encode(format!("failed to write MP4 sample: {}", e)))?;

        self.samples += 1;
        self.bytes += sample.bytes.len() as u64;
        Ok(())
    }

    /// Number of samples written so far.
    pub fn sample_count(&self) -> u64 {
        self.samples
    }
}

impl<W: Write + Seek + Send> ContainerWriter<W> for Mp4FileWriter<W> {
    const FORMAT: OutputFormat = OutputFormat::Mp4;

    fn stream_time_base(params: &CodecParameters) -> TimeBase {
        TimeBase::new(1, mp4_timescale(params.frame_rate)).unwrap_or(TimeBase::MILLISECONDS)
    }

    fn start(sink: W, stream: &Stream, options: &FormatOptions) -> Result<Self> {
        let params = &stream.params;
        let sets = params.extradata.clone().ok_or_else(|| {
            Error::ContainerHeader("H.264 stream has no SPS/PPS extradata".to_string())
        })?;
        let (width, height) = match (u16::try_from(params.width), u16::try_from(params.height)) {
            (Ok(w), Ok(h)) => (w, h),
            _ => {
                return Err(Error::ContainerHeader(format!(
                    "{}x{} exceeds the MP4 track size limit",
                    params.width, params.height
                )));
            }
        };

        let major_brand = brand(options.major_brand.as_deref().unwrap_or(DEFAULT_BRAND))?;
        let config = Mp4Config {
            major_brand,
            minor_version: 512,
            compatible_brands: COMPATIBLE_BRANDS
                .iter()
                .map(|b| brand(b))
                .collect::<Result<_>>()?,
            timescale: MOVIE_TIMESCALE,
        };

        let mut writer = Mp4Writer::write_start(sink, &config)
            .map_err(|e| Error::ContainerHeader(format!("failed to write MP4 header: {}", e)))?;

        let track = TrackConfig {
            track_type: TrackType::Video,
            timescale: stream.time_base.den(),
            language: "und".to_string(),
            media_conf: MediaConfig::AvcConfig(AvcConfig {
                width,
                height,
                seq_param_set: sets.sps,
                pic_param_set: sets.pps,
            }),
        };
        writer
            .add_track(&track)
            .map_err(|e| Error::ContainerHeader(format!("failed to add MP4 track: {}", e)))?;

        Ok(Self {
            writer,
            pending: None,
            samples: 0,
            bytes: 0,
        })
    }

    fn write_packet(&mut self, packet: Packet) -> Result<()> {
        if let Some(previous) = self.pending.take() {
            let delta = packet.dts - previous.dts;
            if delta <= 0 {
                return Err(Error::Encode(format!(
                    "non-monotonic dts {} after {}",
                    packet.dts, previous.dts
                )));
            }
            self.write_sample(previous, delta)?;
        }
        self.pending = Some(packet);
        Ok(())
    }

    fn finish(mut self) -> Result<W> {
        if let Some(last) = self.pending.take() {
            let duration = last.duration.max(1);
            self.write_sample(last, duration)?;
        }
        self.writer
            .write_end()
            .map_err(|e| Error::TrailerWrite(format!("failed to finalize MP4: {}", e)))?;

        tracing::debug!(samples = self.samples, bytes = self.bytes, "Finished MP4 file");
        Ok(self.writer.into_writer())
    }

    fn finalize_file(file: &mut File, options: &FormatOptions) -> Result<()> {
        if !options.faststart && options.writing_app.is_none() {
            return Ok(());
        }
        match faststart::optimize(file, options) {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::warn!("MP4 layout not recognised, leaving file as written");
                Ok(())
            }
            Err(e) => Err(Error::TrailerWrite(format!("MP4 post-processing failed: {}", e))),
        }
    }
}

impl<W: Write + Seek> std::fmt::Debug for Mp4FileWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mp4FileWriter")
            .field("samples", &self.samples)
            .field("bytes", &self.bytes)
            .field("pending", &self.pending.is_some())
            .finish()
    }
}
