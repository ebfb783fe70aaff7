//! Codec parameters handed from the encoder to the container stream.

use crate::config::ParameterSets;
use crate::error::{Error, Result};
use crate::format::CodecType;
use crate::temporal::TimeBase;

use super::nal;

/// What an opened encoder tells the muxer about its output.
#[derive(Debug, Clone, PartialEq)]
pub struct CodecParameters {
    /// Codec of the stream.
    pub codec: CodecType,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Time base of packet timestamps as produced by the encoder.
    pub time_base: TimeBase,
    /// Nominal frames per second.
    pub frame_rate: u32,
    /// Target bitrate in bits per second.
    pub bit_rate: u32,
    /// Out-of-band SPS/PPS.
    pub extradata: Option<ParameterSets>,
}

impl CodecParameters {
    /// Parameters for an H.264 stream.
    pub fn h264(width: u32, height: u32, frame_rate: u32) -> Result<Self> {
        let time_base = TimeBase::from_frame_rate(frame_rate).ok_or_else(|| {
            Error::InvalidParameter("frame rate must be greater than zero".to_string())
        })?;
        Ok(Self {
            codec: CodecType::H264,
            width,
            height,
            time_base,
            frame_rate,
            bit_rate: 0,
            extradata: None,
        })
    }

    /// Set the bitrate.
    pub fn with_bit_rate(mut self, bps: u32) -> Self {
        self.bit_rate = bps;
        self
    }

    /// Set the parameter sets.
    pub fn with_extradata(mut self, sets: ParameterSets) -> Self {
        self.extradata = Some(sets);
        self
    }

    /// `avcC` record built from the parameter sets.
    pub fn avc_decoder_config(&self) -> Result<Vec<u8>> {
        let sets = self.extradata.as_ref().ok_or_else(|| {
            Error::StreamCreation("H.264 stream has no SPS/PPS extradata".to_string())
        })?;
        nal::avc_decoder_config(sets)
    }

    /// Profile name derived from `profile_idc` in the SPS.
    pub fn profile_name(&self) -> Option<&'static str> {
        let profile_idc = *self.extradata.as_ref()?.sps.get(1)?;
        Some(match profile_idc {
            66 => "Constrained Baseline",
            77 => "Main",
            88 => "Extended",
            100 => "High",
            110 => "High 10",
            122 => "High 4:2:2",
            244 => "High 4:4:4",
            _ => "Unknown",
        })
    }

    /// Level times ten from `level_idc` in the SPS.
    pub fn level(&self) -> Option<u8> {
        self.extradata.as_ref()?.sps.get(3).copied()
    }

    /// Nanoseconds per frame.
    pub fn frame_duration_ns(&self) -> u64 {
        1_000_000_000 / self.frame_rate.max(1) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_h264_parameters() {
        let params = CodecParameters::h264(256, 256, 25).unwrap();
        assert_eq!(params.time_base, TimeBase::from_frame_rate(25).unwrap());
        assert_eq!(params.frame_duration_ns(), 40_000_000);
        assert!(params.profile_name().is_none());
        assert!(matches!(
            params.avc_decoder_config(),
            Err(Error::StreamCreation(_))
        ));
    }

    #[test]
    fn test_zero_frame_rate() {
        assert!(matches!(
            CodecParameters::h264(256, 256, 0),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_profile_and_level() {
        let params = CodecParameters::h264(64, 64, 30)
            .unwrap()
            .with_extradata(ParameterSets::new(vec![0x67, 66, 0xc0, 31], vec![0x68]));
        assert_eq!(params.profile_name(), Some("Constrained Baseline"));
        assert_eq!(params.level(), Some(31));
        assert!(params.avc_decoder_config().is_ok());
    }
}
