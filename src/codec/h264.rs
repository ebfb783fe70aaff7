//! H.264/AVC encoder engine using OpenH264.
//!
//! OpenH264 is Cisco's BSD-2 licensed encoder; the source is bundled with
//! the `openh264` crate and built with the host C++ compiler.
//!
//! The engine adds what a container needs on top of the raw encoder:
//!
//! - a fixed GOP, by forcing an IDR frame every `gop_size` frames
//! - out-of-band SPS/PPS, derived once at open from a probe encode
//! - decoupled submit/receive with a bounded queue of pending packets
//!
//! # Example
//!
//! ```rust,ignore
//! use recorda::codec::{EncoderEngine, H264Engine};
//!
//! let mut engine = H264Engine::new();
//! let params = engine.open(&CodecConfig::default(), 1280, 720, time_base)?;
//!
//! engine.submit(&frame)?;
//! while let EncoderOutput::Packet(packet) = engine.receive()? {
//!     // packet.data is an Annex-B access unit
//! }
//! ```

use std::collections::VecDeque;

use openh264::OpenH264API;
use openh264::encoder::{BitRate, Encoder, EncoderConfig, FrameRate};
use openh264::formats::YUVSource;

use crate::config::{CodecConfig, ParameterSets};
use crate::error::{Error, Result};
use crate::frame::{FrameBuffer, PlanarFrame};
use crate::temporal::TimeBase;

use super::nal;
use super::params::CodecParameters;
use super::traits::{EncoderEngine, EncoderOutput, Packet, Submit};

/// Packets the engine holds before refusing more input.
const MAX_PENDING: usize = 16;

// ============================================================================
// YUV source adapter
// ============================================================================

impl YUVSource for PlanarFrame<'_> {
    fn dimensions(&self) -> (usize, usize) {
        (self.width as usize, self.height as usize)
    }

    fn strides(&self) -> (usize, usize, usize) {
        self.strides
    }

    fn y(&self) -> &[u8] {
        self.y
    }

    fn u(&self) -> &[u8] {
        self.u
    }

    fn v(&self) -> &[u8] {
        self.v
    }
}

fn encoder_config(config: &CodecConfig, frame_rate: f32) -> EncoderConfig {
    let mut encoder_config = EncoderConfig::new();

    if config.bitrate_bps > 0 {
        encoder_config = encoder_config.bitrate(BitRate::from_bps(config.bitrate_bps));
    }

    // Every submitted frame must come back as an access unit.
    encoder_config
        .skip_frames(false)
        .max_frame_rate(FrameRate::from_hz(frame_rate))
        .scene_change_detect(config.scene_change_detect)
        .num_threads(config.threads)
}

fn create_encoder(config: &CodecConfig, frame_rate: f32) -> Result<Encoder> {
    let api = OpenH264API::from_source();
    Encoder::with_api_config(api, encoder_config(config, frame_rate))
        .map_err(|e| Error::EncoderOpen(format!("Failed to create H.264 encoder: {:?}", e)))
}

/// Encode one mid-grey frame on a throwaway encoder and pick up the SPS/PPS
/// it emits with its first IDR.
fn probe_parameter_sets(
    config: &CodecConfig,
    frame_rate: f32,
    width: u32,
    height: u32,
) -> Result<ParameterSets> {
    let mut probe = create_encoder(config, frame_rate)?;
    let mut buffer = FrameBuffer::new(width, height)?;
    buffer.fill(128, 128, 128);

    let bitstream = probe
        .encode(&buffer.as_planar())
        .map_err(|e| Error::EncoderOpen(format!("H.264 probe encode failed: {:?}", e)))?;

    nal::parameter_sets(&bitstream.to_vec()).ok_or_else(|| {
        Error::EncoderOpen("encoder did not emit SPS/PPS for the probe frame".to_string())
    })
}

/// The `level_idc` signalled in `sets` when it is not the requested level.
fn level_mismatch(requested: u8, sets: &ParameterSets) -> Option<u8> {
    sets.sps.get(3).copied().filter(|&level| level != requested)
}

// ============================================================================
// Engine
// ============================================================================

/// H.264 encoder engine using OpenH264.
///
/// OpenH264 produces one access unit per frame and never reorders, so
/// packets carry `dts == pts` and a one-tick duration. B-frame, CRF,
/// profile and preset settings have no OpenH264 counterpart and are
/// logged but not applied.
pub struct H264Engine {
    encoder: Option<Encoder>,
    width: u32,
    height: u32,
    gop_size: u32,
    frames_submitted: u64,
    bytes_encoded: u64,
    pending: VecDeque<Packet>,
    flushed: bool,
}

impl H264Engine {
    /// Create a closed engine.
    pub fn new() -> Self {
        Self {
            encoder: None,
            width: 0,
            height: 0,
            gop_size: 0,
            frames_submitted: 0,
            bytes_encoded: 0,
            pending: VecDeque::new(),
            flushed: false,
        }
    }

    /// Get the number of frames submitted since open.
    pub fn frame_count(&self) -> u64 {
        self.frames_submitted
    }

    /// Get the total bytes encoded since open.
    pub fn bytes_encoded(&self) -> u64 {
        self.bytes_encoded
    }
}

impl Default for H264Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderEngine for H264Engine {
    fn name(&self) -> &str {
        "openh264"
    }

    fn open(
        &mut self,
        config: &CodecConfig,
        width: u32,
        height: u32,
        time_base: TimeBase,
    ) -> Result<CodecParameters> {
        if self.encoder.is_some() {
            return Err(Error::EncoderOpen("encoder is already open".to_string()));
        }
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(Error::EncoderOpen(format!(
                "H.264 needs even, non-zero dimensions, got {}x{}",
                width, height
            )));
        }
        if time_base.num() != 1 {
            return Err(Error::EncoderOpen(format!(
                "encoder time base must be 1/fps, got {}",
                time_base
            )));
        }

        let frame_rate = time_base.den();
        if config.max_b_frames > 0 || config.profile != "baseline" {
            tracing::debug!(
                profile = %config.profile,
                preset = %config.preset,
                crf = %config.crf,
                max_b_frames = config.max_b_frames,
                "OpenH264 encodes constrained baseline without B-frames; tuning names are ignored"
            );
        }

        let parameter_sets = match &config.parameter_sets {
            Some(sets) => sets.clone(),
            None => probe_parameter_sets(config, frame_rate as f32, width, height)?,
        };
        if let Some(level) = level_mismatch(config.level, &parameter_sets) {
            tracing::debug!(
                requested = config.level,
                signalled = level,
                "H.264 level differs from the one in the SPS; the SPS value is used"
            );
        }

        let encoder = create_encoder(config, frame_rate as f32)?;

        self.encoder = Some(encoder);
        self.width = width;
        self.height = height;
        self.gop_size = config.gop_size;
        self.frames_submitted = 0;
        self.bytes_encoded = 0;
        self.pending.clear();
        self.flushed = false;

        tracing::debug!(
            width,
            height,
            frame_rate,
            bitrate = config.bitrate_bps,
            gop = config.gop_size,
            sps_len = parameter_sets.sps.len(),
            pps_len = parameter_sets.pps.len(),
            "Opened OpenH264 encoder"
        );

        Ok(CodecParameters::h264(width, height, frame_rate)?
            .with_bit_rate(config.bitrate_bps)
            .with_extradata(parameter_sets))
    }

    fn is_open(&self) -> bool {
        self.encoder.is_some()
    }

    fn submit(&mut self, frame: &PlanarFrame<'_>) -> Result<Submit> {
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| Error::Encode("encoder is not open".to_string()))?;

        if self.flushed {
            return Err(Error::Encode(
                "frame submitted after end of stream".to_string(),
            ));
        }

        if frame.width != self.width || frame.height != self.height {
            return Err(Error::InvalidFrame(format!(
                "Frame dimensions {}x{} don't match encoder config {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }

        if self.pending.len() >= MAX_PENDING {
            return Ok(Submit::Rejected);
        }

        if self.gop_size > 0 && self.frames_submitted % self.gop_size as u64 == 0 {
            encoder.force_intra_frame();
        }

        let encoded = encoder
            .encode(frame)
            .map_err(|e| Error::Encode(format!("H.264 encode failed: {:?}", e)))?
            .to_vec();
        if encoded.is_empty() {
            return Err(Error::Encode(format!(
                "encoder produced no output for frame {}",
                frame.pts
            )));
        }
        self.frames_submitted += 1;

        self.bytes_encoded += encoded.len() as u64;
        let keyframe = nal::contains_idr(&encoded);
        self.pending
            .push_back(Packet::new(encoded, frame.pts).with_keyframe(keyframe));

        Ok(Submit::Accepted)
    }

    fn receive(&mut self) -> Result<EncoderOutput> {
        if self.encoder.is_none() {
            return Err(Error::Encode("encoder is not open".to_string()));
        }
        Ok(match self.pending.pop_front() {
            Some(packet) => EncoderOutput::Packet(packet),
            None if self.flushed => EncoderOutput::EndOfStream,
            None => EncoderOutput::NeedsInput,
        })
    }

    fn flush(&mut self) -> Result<()> {
        if self.encoder.is_none() {
            return Err(Error::Encode("encoder is not open".to_string()));
        }
        // OpenH264 doesn't buffer frames; only our queue remains.
        self.flushed = true;
        Ok(())
    }

    fn close(&mut self) {
        if self.encoder.take().is_some() {
            tracing::debug!(
                frames = self.frames_submitted,
                bytes = self.bytes_encoded,
                "Closed OpenH264 encoder"
            );
        }
        self.pending.clear();
        self.flushed = false;
    }
}

impl std::fmt::Debug for H264Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("H264Engine")
            .field("open", &self.encoder.is_some())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("gop_size", &self.gop_size)
            .field("frames_submitted", &self.frames_submitted)
            .field("pending", &self.pending.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
