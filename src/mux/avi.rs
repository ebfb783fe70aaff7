//! AVI (RIFF) container writer.
//!
//! Layout:
//!
//! ```text
//! RIFF 'AVI '
//!   LIST 'hdrl'
//!     'avih'                    main header
//!     LIST 'strl'
//!       'strh'                  stream header ('vids', 'H264')
//!       'strf'                  BITMAPINFOHEADER + Annex-B SPS/PPS
//!   LIST 'movi'
//!     '00dc' ...                one chunk per frame, Annex-B
//!   'idx1'                      legacy index
//! ```
//!
//! Frame counts and sizes are patched when the trailer is written. AVI
//! has no timestamps, so gaps in the decode timeline are filled with empty
//! `00dc` chunks.

use std::io::{Seek, SeekFrom, Write};

use crate::codec::{CodecParameters, Packet};
use crate::config::FormatOptions;
use crate::error::{Error, Result};
use crate::format::OutputFormat;
use crate::temporal::TimeBase;

use super::{ContainerWriter, Stream};

const AVIF_HASINDEX: u32 = 0x10;
const AVIF_ISINTERLEAVED: u32 = 0x100;
const AVIIF_KEYFRAME: u32 = 0x10;

const AVIH_SIZE: u32 = 56;
const STRH_SIZE: u32 = 56;
const BITMAPINFOHEADER_SIZE: u32 = 40;

/// One `idx1` entry.
#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    flags: u32,
    /// Offset of the chunk header from the `movi` FourCC.
    offset: u32,
    size: u32,
}

/// Positions of the fields patched by the trailer.
#[derive(Debug, Clone, Copy, Default)]
struct Patches {
    riff_size: u64,
    avih_max_bytes_per_sec: u64,
    avih_total_frames: u64,
    avih_suggested_buffer: u64,
    strh_length: u64,
    strh_suggested_buffer: u64,
    movi_size: u64,
    /// Position of the `movi` FourCC.
    movi_start: u64,
}

/// AVI writer over any seekable sink.
pub struct AviWriter<W: Write + Seek> {
    sink: W,
    patches: Patches,
    index: Vec<IndexEntry>,
    frame_rate: u32,
    next_dts: Option<i64>,
    max_chunk: u32,
    payload_bytes: u64,
}

fn fourcc(code: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*code)
}

impl<W: Write + Seek> AviWriter<W> {
    fn write_u32(&mut self, value: u32) -> Result<()> {
        self.sink.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    fn write_u16(&mut self, value: u16) -> Result<()> {
        self.sink.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    fn pos(&mut self) -> Result<u64> {
        Ok(self.sink.stream_position()?)
    }

    fn patch_u32(&mut self, at: u64, value: u32) -> Result<()> {
        self.sink.seek(SeekFrom::Start(at))?;
        self.write_u32(value)
    }

    /// Write a chunk header and payload, padded to an even size.
    fn write_chunk(&mut self, id: &[u8; 4], payload: &[u8]) -> Result<()> {
        self.sink.write_all(id)?;
        self.write_u32(payload.len() as u32)?;
        self.sink.write_all(payload)?;
        if payload.len() % 2 == 1 {
            self.sink.write_all(&[0])?;
        }
        Ok(())
    }

    fn write_headers(&mut self, params: &CodecParameters) -> Result<()> {
        let micro_sec_per_frame = 1_000_000 / params.frame_rate.max(1);
        let extradata = params
            .extradata
            .as_ref()
            .map(|sets| sets.to_annex_b())
            .unwrap_or_default();
        let strf_size = BITMAPINFOHEADER_SIZE + extradata.len() as u32;
        let strl_size = 4 + (8 + STRH_SIZE) + (8 + strf_size + strf_size % 2);
        let hdrl_size = 4 + (8 + AVIH_SIZE) + (8 + strl_size);

        self.sink.write_all(b"RIFF")?;
        self.patches.riff_size = self.pos()?;
        self.write_u32(0)?;
        self.sink.write_all(b"AVI ")?;

        self.sink.write_all(b"LIST")?;
        self.write_u32(hdrl_size)?;
        self.sink.write_all(b"hdrl")?;

        // avih
        self.sink.write_all(b"avih")?;
        self.write_u32(AVIH_SIZE)?;
        self.write_u32(micro_sec_per_frame)?;
        self.patches.avih_max_bytes_per_sec = self.pos()?;
        self.write_u32(0)?; // dwMaxBytesPerSec
        self.write_u32(0)?; // dwPaddingGranularity
        self.write_u32(AVIF_HASINDEX | AVIF_ISINTERLEAVED)?;
        self.patches.avih_total_frames = self.pos()?;
        self.write_u32(0)?; // dwTotalFrames
        self.write_u32(0)?; // dwInitialFrames
        self.write_u32(1)?; // dwStreams
        self.patches.avih_suggested_buffer = self.pos()?;
        self.write_u32(0)?; // dwSuggestedBufferSize
        self.write_u32(params.width)?;
        self.write_u32(params.height)?;
        for _ in 0..4 {
            self.write_u32(0)?; // dwReserved
        }

        self.sink.write_all(b"LIST")?;
        self.write_u32(strl_size)?;
        self.sink.write_all(b"strl")?;

        // strh
        self.sink.write_all(b"strh")?;
        self.write_u32(STRH_SIZE)?;
        self.sink.write_all(b"vids")?;
        self.sink.write_all(b"H264")?;
        self.write_u32(0)?; // dwFlags
        self.write_u16(0)?; // wPriority
        self.write_u16(0)?; // wLanguage
        self.write_u32(0)?; // dwInitialFrames
        self.write_u32(1)?; // dwScale
        self.write_u32(params.frame_rate)?; // dwRate
        self.write_u32(0)?; // dwStart
        self.patches.strh_length = self.pos()?;
        self.write_u32(0)?; // dwLength
        self.patches.strh_suggested_buffer = self.pos()?;
        self.write_u32(0)?; // dwSuggestedBufferSize
        self.write_u32(u32::MAX)?; // dwQuality
        self.write_u32(0)?; // dwSampleSize
        self.write_u16(0)?; // rcFrame
        self.write_u16(0)?;
        self.write_u16(params.width as u16)?;
        self.write_u16(params.height as u16)?;

        // strf
        let mut strf = Vec::with_capacity(strf_size as usize);
        strf.extend_from_slice(&strf_size.to_le_bytes()); // biSize
        strf.extend_from_slice(&(params.width as i32).to_le_bytes());
        strf.extend_from_slice(&(params.height as i32).to_le_bytes());
        strf.extend_from_slice(&1u16.to_le_bytes()); // biPlanes
        strf.extend_from_slice(&24u16.to_le_bytes()); // biBitCount
        strf.extend_from_slice(b"H264"); // biCompression
        strf.extend_from_slice(&(params.width * params.height * 3).to_le_bytes());
        strf.extend_from_slice(&[0u8; 16]); // resolution and palette
        strf.extend_from_slice(&extradata);
        self.write_chunk(b"strf", &strf)?;

        self.sink.write_all(b"LIST")?;
        self.patches.movi_size = self.pos()?;
        self.write_u32(0)?;
        self.patches.movi_start = self.pos()?;
        self.sink.write_all(b"movi")?;
        Ok(())
    }

    fn write_frame_chunk(&mut self, data: &[u8], keyframe: bool) -> Result<()> {
        let offset = self.pos()? - self.patches.movi_start;
        let offset = u32::try_from(offset)
            .map_err(|_| Error::Encode("AVI file exceeds 4 GiB".to_string()))?;
        self.write_chunk(b"00dc", data)?;

        self.index.push(IndexEntry {
            flags: if keyframe { AVIIF_KEYFRAME } else { 0 },
            offset,
            size: data.len() as u32,
        });
        self.max_chunk = self.max_chunk.max(data.len() as u32);
        self.payload_bytes += data.len() as u64;
        Ok(())
    }

    /// Number of frames written so far, including gap fillers.
    pub fn frame_count(&self) -> usize {
        self.index.len()
    }
}

impl<W: Write + Seek + Send> ContainerWriter<W> for AviWriter<W> {
    const FORMAT: OutputFormat = OutputFormat::Avi;

    fn stream_time_base(params: &CodecParameters) -> TimeBase {
        params.time_base
    }

    fn start(sink: W, stream: &Stream, _options: &FormatOptions) -> Result<Self> {
        let mut writer = Self {
            sink,
            patches: Patches::default(),
            index: Vec::new(),
            frame_rate: stream.params.frame_rate,
            next_dts: None,
            max_chunk: 0,
            payload_bytes: 0,
        };
        writer
            .write_headers(&stream.params)
            .map_err(|e| Error::ContainerHeader(e.to_string()))?;
        Ok(writer)
    }

    fn write_packet(&mut self, packet: Packet) -> Result<()> {
        if let Some(expected) = self.next_dts {
            if packet.dts < expected {
                return Err(Error::Encode(format!(
                    "non-monotonic dts {} (expected at least {})",
                    packet.dts, expected
                )));
            }
            for _ in expected..packet.dts {
                self.write_frame_chunk(&[], false)?;
            }
        }
        self.write_frame_chunk(&packet.data, packet.keyframe)?;
        self.next_dts = Some(packet.dts + packet.duration.max(1));
        Ok(())
    }

    fn finish(mut self) -> Result<W> {
        let movi_end = self.pos()?;

        self.sink.write_all(b"idx1")?;
        self.write_u32(self.index.len() as u32 * 16)?;
        for i in 0..self.index.len() {
            let entry = self.index[i];
            self.sink.write_all(b"00dc")?;
            self.write_u32(entry.flags)?;
            self.write_u32(entry.offset)?;
            self.write_u32(entry.size)?;
        }
        let end = self.pos()?;

        let frames = self.index.len() as u32;
        let seconds = (frames as u64).div_ceil(self.frame_rate.max(1) as u64).max(1);
        let max_bytes_per_sec = (self.payload_bytes / seconds) as u32;
        let movi_size = (movi_end - self.patches.movi_start) as u32;
        let riff_size = (end - 8) as u32;
        let suggested = self.max_chunk + 8;

        let p = self.patches;
        self.patch_u32(p.riff_size, riff_size)?;
        self.patch_u32(p.avih_max_bytes_per_sec, max_bytes_per_sec)?;
        self.patch_u32(p.avih_total_frames, frames)?;
        self.patch_u32(p.avih_suggested_buffer, suggested)?;
        self.patch_u32(p.strh_length, frames)?;
        self.patch_u32(p.strh_suggested_buffer, suggested)?;
        self.patch_u32(p.movi_size, movi_size)?;
        self.sink.seek(SeekFrom::Start(end))?;
        self.sink.flush()?;

        tracing::debug!(frames, bytes = end, "Finished AVI file");
        Ok(self.sink)
    }
}

impl<W: Write + Seek> std::fmt::Debug for AviWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AviWriter")
            .field("frames", &self.index.len())
            .field("frame_rate", &self.frame_rate)
            .field("payload_bytes", &self.payload_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParameterSets;
    use std::io::Cursor;

    fn le32(data: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
    }

    fn stream() -> Stream {
        let params = CodecParameters::h264(320, 240, 25)
            .unwrap()
            .with_extradata(ParameterSets::new(vec![0x67, 0x42, 0, 0x1f], vec![0x68, 1]));
        Stream {
            index: 0,
            time_base: AviWriter::<Cursor<Vec<u8>>>::stream_time_base(&params),
            params,
        }
    }

    fn find(data: &[u8], tag: &[u8; 4]) -> usize {
        data.windows(4)
            .position(|w| w == tag)
            .expect("Should contain tag")
    }

    #[test]
    fn test_empty_file_is_valid_riff() {
        let writer =
            AviWriter::start(Cursor::new(Vec::new()), &stream(), &FormatOptions::default())
                .unwrap();
        let data = writer.finish().unwrap().into_inner();

        assert_eq!(&data[0..4], b"RIFF");
        assert_eq!(le32(&data, 4) as usize, data.len() - 8);
        assert_eq!(&data[8..12], b"AVI ");

        let avih = find(&data, b"avih");
        assert_eq!(le32(&data, avih + 8), 40_000); // us per frame
        assert_eq!(le32(&data, avih + 8 + 16), 0); // total frames
        assert_eq!(le32(&data, avih + 8 + 32), 320);

        let idx1 = find(&data, b"idx1");
        assert_eq!(le32(&data, idx1 + 4), 0);
    }

    #[test]
    fn test_frames_and_index() {
        let mut writer =
            AviWriter::start(Cursor::new(Vec::new()), &stream(), &FormatOptions::default())
                .unwrap();
        writer
            .write_packet(Packet::new(vec![0, 0, 0, 1, 0x65, 1, 2], 0).with_keyframe(true))
            .unwrap();
        writer
            .write_packet(Packet::new(vec![0, 0, 0, 1, 0x41, 3], 1))
            .unwrap();
        // Gap of one frame
        writer
            .write_packet(Packet::new(vec![0, 0, 0, 1, 0x41, 4], 3))
            .unwrap();
        assert_eq!(writer.frame_count(), 4);

        let data = writer.finish().unwrap().into_inner();
        let strh = find(&data, b"strh");
        assert_eq!(&data[strh + 12..strh + 16], b"H264");
        assert_eq!(le32(&data, strh + 8 + 32), 4); // dwLength

        let idx1 = find(&data, b"idx1");
        assert_eq!(le32(&data, idx1 + 4), 4 * 16);
        assert_eq!(le32(&data, idx1 + 12), AVIIF_KEYFRAME);
        assert_eq!(le32(&data, idx1 + 28), 0);
        assert_eq!(le32(&data, idx1 + 8 + 2 * 16 + 12), 0); // filler

        // First index entry points at the first chunk, relative to 'movi'
        let movi = find(&data, b"movi");
        let first = le32(&data, idx1 + 16) as usize;
        assert_eq!(&data[movi + first..movi + first + 4], b"00dc");
        assert_eq!(le32(&data, movi + first + 4), 7);
    }

    #[test]
    fn test_rejects_backwards_dts() {
        let mut writer =
            AviWriter::start(Cursor::new(Vec::new()), &stream(), &FormatOptions::default())
                .unwrap();
        writer.write_packet(Packet::new(vec![1], 5)).unwrap();
        assert!(writer.write_packet(Packet::new(vec![1], 2)).is_err());
    }
}
