//! Recorder configuration.
//!
//! All configuration is plain data with builder-style setters. A
//! [`CodecConfig`] is applied once when the encoder is opened and never
//! mutated afterwards.

use crate::converters::{ColorMatrix, ColorRange, ScaleAlgorithm};
use crate::format::OutputFormat;

// ============================================================================
// Codec Configuration
// ============================================================================

/// Out-of-band H.264 parameter sets, stored in the container as codec
/// extradata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSets {
    /// Sequence parameter set, without start code.
    pub sps: Vec<u8>,
    /// Picture parameter set, without start code.
    pub pps: Vec<u8>,
}

impl ParameterSets {
    /// Create parameter sets from raw SPS and PPS NAL units.
    pub fn new(sps: impl Into<Vec<u8>>, pps: impl Into<Vec<u8>>) -> Self {
        Self {
            sps: sps.into(),
            pps: pps.into(),
        }
    }

    /// Annex-B form: start code, SPS, start code, PPS.
    pub fn to_annex_b(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.sps.len() + self.pps.len());
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(&self.sps);
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(&self.pps);
        out
    }
}

/// Encoder tuning parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CodecConfig {
    /// Target bitrate in bits per second.
    pub bitrate_bps: u32,
    /// Frames between two keyframes.
    pub gop_size: u32,
    /// Maximum number of consecutive B-frames.
    pub max_b_frames: u32,
    /// Expected H.264 level times ten (31 = level 3.1). OpenH264 picks the
    /// level itself; a different `level_idc` in the SPS is logged at open.
    pub level: u8,
    /// Constant rate factor.
    pub crf: String,
    /// H.264 profile name.
    pub profile: String,
    /// Speed/quality preset name.
    pub preset: String,
    /// Number of encoder threads (0 = auto).
    pub threads: u16,
    /// Enable scene change detection (may insert extra keyframes).
    pub scene_change_detect: bool,
    /// Fixed parameter sets to advertise instead of the encoder's own.
    pub parameter_sets: Option<ParameterSets>,
}

impl CodecConfig {
    /// Create a configuration with default tuning.
    pub fn new() -> Self {
        Self {
            bitrate_bps: 400_000,
            gop_size: 12,
            max_b_frames: 1,
            level: 31,
            crf: "12".to_string(),
            profile: "main".to_string(),
            preset: "slow".to_string(),
            threads: 0,
            scene_change_detect: false,
            parameter_sets: None,
        }
    }

    /// Set the target bitrate in bits per second.
    pub fn bitrate(mut self, bps: u32) -> Self {
        self.bitrate_bps = bps;
        self
    }

    /// Set the keyframe interval in frames.
    pub fn gop_size(mut self, frames: u32) -> Self {
        self.gop_size = frames;
        self
    }

    /// Set the maximum number of B-frames.
    pub fn max_b_frames(mut self, frames: u32) -> Self {
        self.max_b_frames = frames;
        self
    }

    /// Set the level (times ten).
    pub fn level(mut self, level: u8) -> Self {
        self.level = level;
        self
    }

    /// Set the constant rate factor.
    pub fn crf(mut self, crf: impl Into<String>) -> Self {
        self.crf = crf.into();
        self
    }

    /// Set the profile name.
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    /// Set the preset name.
    pub fn preset(mut self, preset: impl Into<String>) -> Self {
        self.preset = preset.into();
        self
    }

    /// Set the number of encoding threads.
    pub fn threads(mut self, threads: u16) -> Self {
        self.threads = threads;
        self
    }

    /// Enable or disable scene change detection.
    pub fn scene_change_detect(mut self, enabled: bool) -> Self {
        self.scene_change_detect = enabled;
        self
    }

    /// Advertise fixed parameter sets as codec extradata.
    pub fn parameter_sets(mut self, sets: ParameterSets) -> Self {
        self.parameter_sets = Some(sets);
        self
    }

    /// Settings for recording a desktop: mostly static content, few keyframes.
    pub fn screen_capture() -> Self {
        Self::new().bitrate(1_000_000).gop_size(60)
    }

    /// Settings for live preview: short GOP, no B-frames.
    pub fn low_latency() -> Self {
        Self::new()
            .gop_size(15)
            .max_b_frames(0)
            .preset("veryfast")
            .profile("baseline")
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Format Options
// ============================================================================

/// Container-private options written together with the header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatOptions {
    /// MP4: move the `moov` box in front of `mdat` when the file is finished.
    pub faststart: bool,
    /// MP4: override the major brand (four characters).
    pub major_brand: Option<String>,
    /// MKV/MP4: application name stored in the file metadata.
    pub writing_app: Option<String>,
}

impl FormatOptions {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sensible options for a given format.
    pub fn for_format(format: OutputFormat) -> Self {
        let opts = Self::new().writing_app(concat!("recorda ", env!("CARGO_PKG_VERSION")));
        match format {
            OutputFormat::Mp4 => opts.faststart(true),
            OutputFormat::Avi | OutputFormat::Mkv => opts,
        }
    }

    /// Enable or disable faststart relocation.
    pub fn faststart(mut self, enabled: bool) -> Self {
        self.faststart = enabled;
        self
    }

    /// Override the MP4 major brand.
    pub fn major_brand(mut self, brand: impl Into<String>) -> Self {
        self.major_brand = Some(brand.into());
        self
    }

    /// Set the writing application name.
    pub fn writing_app(mut self, app: impl Into<String>) -> Self {
        self.writing_app = Some(app.into());
        self
    }
}

// ============================================================================
// Converter Configuration
// ============================================================================

/// RGB to YUV conversion settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConverterConfig {
    /// YUV matrix coefficients.
    pub matrix: ColorMatrix,
    /// Output value range.
    pub range: ColorRange,
    /// Scaling filter used when the source size differs.
    pub algorithm: ScaleAlgorithm,
}

impl ConverterConfig {
    /// BT.601, limited range, bicubic scaling.
    pub fn new() -> Self {
        Self {
            matrix: ColorMatrix::Bt601,
            range: ColorRange::Limited,
            algorithm: ScaleAlgorithm::Bicubic,
        }
    }

    /// Set the matrix coefficients.
    pub fn matrix(mut self, matrix: ColorMatrix) -> Self {
        self.matrix = matrix;
        self
    }

    /// Set the output range.
    pub fn range(mut self, range: ColorRange) -> Self {
        self.range = range;
        self
    }

    /// Set the scaling filter.
    pub fn algorithm(mut self, algorithm: ScaleAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Recorder Configuration
// ============================================================================

/// Everything a recorder is constructed with besides format and codec.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecorderConfig {
    /// Encoder tuning.
    pub codec: CodecConfig,
    /// Container options. `None` picks [`FormatOptions::for_format`].
    pub format_options: Option<FormatOptions>,
    /// Colour conversion.
    pub converter: ConverterConfig,
}

impl RecorderConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the encoder tuning.
    pub fn codec(mut self, codec: CodecConfig) -> Self {
        self.codec = codec;
        self
    }

    /// Set the container options.
    pub fn format_options(mut self, options: FormatOptions) -> Self {
        self.format_options = Some(options);
        self
    }

    /// Set the colour conversion settings.
    pub fn converter(mut self, converter: ConverterConfig) -> Self {
        self.converter = converter;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_config_defaults() {
        let config = CodecConfig::default();
        assert_eq!(config.bitrate_bps, 400_000);
        assert_eq!(config.gop_size, 12);
        assert_eq!(config.max_b_frames, 1);
        assert_eq!(config.level, 31);
        assert_eq!(config.crf, "12");
        assert_eq!(config.profile, "main");
        assert_eq!(config.preset, "slow");
        assert!(config.parameter_sets.is_none());
    }

    #[test]
    fn test_codec_config_presets() {
        let low = CodecConfig::low_latency();
        assert_eq!(low.max_b_frames, 0);
        assert_eq!(low.gop_size, 15);

        let screen = CodecConfig::screen_capture();
        assert_eq!(screen.gop_size, 60);
    }

    #[test]
    fn test_parameter_sets_annex_b() {
        let sets = ParameterSets::new(vec![0x67, 0x42], vec![0x68, 0xce]);
        assert_eq!(
            sets.to_annex_b(),
            vec![0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68, 0xce]
        );
    }

    #[test]
    fn test_format_options_for_format() {
        assert!(FormatOptions::for_format(OutputFormat::Mp4).faststart);
        assert!(!FormatOptions::for_format(OutputFormat::Mkv).faststart);
        assert!(
            FormatOptions::for_format(OutputFormat::Avi)
                .writing_app
                .is_some()
        );
    }

    #[test]
    fn test_converter_config_default() {
        let config = ConverterConfig::default();
        assert_eq!(config.matrix, ColorMatrix::Bt601);
        assert_eq!(config.range, ColorRange::Limited);
        assert_eq!(config.algorithm, ScaleAlgorithm::Bicubic);
    }
}
