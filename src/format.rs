//! Container format and codec identifiers.
//!
//! Both enums are closed: every recorder resolves its `(OutputFormat, CodecType)`
//! pair once at construction into a concrete encoder engine and muxer.

use crate::error::{Error, Result};
use std::path::Path;
use std::str::FromStr;

/// Container format of the recording.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    /// Audio Video Interleave (RIFF).
    Avi,
    /// Matroska.
    Mkv,
    /// ISO base media file format (MPEG-4 Part 14).
    Mp4,
}

impl OutputFormat {
    /// All formats the crate can write.
    pub const ALL: [OutputFormat; 3] = [OutputFormat::Avi, OutputFormat::Mkv, OutputFormat::Mp4];

    /// Short format identifier used to look up a container writer.
    pub fn format_name(&self) -> &'static str {
        match self {
            Self::Avi => "avi",
            Self::Mkv => "matroska",
            Self::Mp4 => "mp4",
        }
    }

    /// Common file extension for this container.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Avi => "avi",
            Self::Mkv => "mkv",
            Self::Mp4 => "mp4",
        }
    }

    /// Guess the format from a file name's extension.
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?;
        ext.parse().ok()
    }

    /// Whether the container stores H.264 as length-prefixed NAL units
    /// with out-of-band parameter sets (AVCC) instead of Annex-B.
    pub fn uses_avcc(&self) -> bool {
        matches!(self, Self::Mkv | Self::Mp4)
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.format_name())
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "avi" => Ok(Self::Avi),
            "mkv" | "matroska" => Ok(Self::Mkv),
            "mp4" | "m4v" => Ok(Self::Mp4),
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Video codec used for the recording.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodecType {
    /// H.264/AVC
    H264,
}

impl CodecType {
    /// Get the human-readable name of the codec.
    pub fn name(&self) -> &'static str {
        match self {
            Self::H264 => "H.264/AVC",
        }
    }

    /// Check that this codec can be stored in the given container.
    ///
    /// Fails with [`Error::Configuration`] for unsupported pairs, before any
    /// resource is allocated.
    pub fn check_container(&self, format: OutputFormat) -> Result<()> {
        match (self, format) {
            (Self::H264, OutputFormat::Avi | OutputFormat::Mkv | OutputFormat::Mp4) => Ok(()),
        }
    }
}

impl std::fmt::Display for CodecType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_names() {
        assert_eq!(OutputFormat::Avi.format_name(), "avi");
        assert_eq!(OutputFormat::Mkv.format_name(), "matroska");
        assert_eq!(OutputFormat::Mp4.format_name(), "mp4");
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("MKV".parse::<OutputFormat>().unwrap(), OutputFormat::Mkv);
        assert_eq!(
            "matroska".parse::<OutputFormat>().unwrap(),
            OutputFormat::Mkv
        );
        assert!(matches!(
            "flv".parse::<OutputFormat>(),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            OutputFormat::from_path("capture/screen.mp4"),
            Some(OutputFormat::Mp4)
        );
        assert_eq!(OutputFormat::from_path("screen"), None);
    }

    #[test]
    fn test_bitstream_layout() {
        assert!(!OutputFormat::Avi.uses_avcc());
        assert!(OutputFormat::Mkv.uses_avcc());
        assert!(OutputFormat::Mp4.uses_avcc());
    }

    #[test]
    fn test_h264_fits_every_container() {
        for format in OutputFormat::ALL {
            assert!(CodecType::H264.check_container(format).is_ok());
        }
    }
}
