//! Matroska (EBML) container writer.
//!
//! Layout:
//!
//! ```text
//! EBML header (DocType "matroska")
//! Segment (size patched by the trailer)
//!   Void       reserved, replaced by SeekHead at the trailer
//!   Info       TimestampScale 1ms, Duration patched at the trailer
//!   Tracks     one V_MPEG4/ISO/AVC track, avcC as CodecPrivate
//!   Cluster*   a new cluster on every keyframe
//!   Cues       one CuePoint per keyframe
//! ```
//!
//! Block timestamps are presentation times in milliseconds. Payloads are
//! AVCC with 4-byte lengths.

use std::io::{Seek, SeekFrom, Write};

use crate::codec::{CodecParameters, Packet, nal};
use crate::config::FormatOptions;
use crate::error::{Error, Result};
use crate::format::OutputFormat;
use crate::temporal::TimeBase;

use super::{ContainerWriter, Stream};

// Element IDs
const EBML: u32 = 0x1A45_DFA3;
const EBML_VERSION: u32 = 0x4286;
const EBML_READ_VERSION: u32 = 0x42F7;
const EBML_MAX_ID_LENGTH: u32 = 0x42F2;
const EBML_MAX_SIZE_LENGTH: u32 = 0x42F3;
const DOC_TYPE: u32 = 0x4282;
const DOC_TYPE_VERSION: u32 = 0x4287;
const DOC_TYPE_READ_VERSION: u32 = 0x4285;

const SEGMENT: u32 = 0x1853_8067;
const SEEK_HEAD: u32 = 0x114D_9B74;
const SEEK: u32 = 0x4DBB;
const SEEK_ID: u32 = 0x53AB;
const SEEK_POSITION: u32 = 0x53AC;
const VOID: u32 = 0xEC;

const INFO: u32 = 0x1549_A966;
const TIMESTAMP_SCALE: u32 = 0x2A_D7B1;
const DURATION: u32 = 0x4489;
const MUXING_APP: u32 = 0x4D80;
const WRITING_APP: u32 = 0x5741;

const TRACKS: u32 = 0x1654_AE6B;
const TRACK_ENTRY: u32 = 0xAE;
const TRACK_NUMBER: u32 = 0xD7;
const TRACK_UID: u32 = 0x73C5;
const TRACK_TYPE: u32 = 0x83;
const FLAG_LACING: u32 = 0x9C;
const LANGUAGE: u32 = 0x22_B59C;
const CODEC_ID: u32 = 0x86;
const CODEC_PRIVATE: u32 = 0x63A2;
const DEFAULT_DURATION: u32 = 0x23_E383;
const VIDEO: u32 = 0xE0;
const PIXEL_WIDTH: u32 = 0xB0;
const PIXEL_HEIGHT: u32 = 0xBA;

const CLUSTER: u32 = 0x1F43_B675;
const TIMESTAMP: u32 = 0xE7;
const SIMPLE_BLOCK: u32 = 0xA3;

const CUES: u32 = 0x1C53_BB6B;
const CUE_POINT: u32 = 0xBB;
const CUE_TIME: u32 = 0xB3;
const CUE_TRACK_POSITIONS: u32 = 0xB7;
const CUE_TRACK: u32 = 0xF7;
const CUE_CLUSTER_POSITION: u32 = 0xF1;

const TRACK_TYPE_VIDEO: u64 = 1;
const SIMPLE_BLOCK_KEYFRAME: u8 = 0x80;
/// Bytes reserved after the segment header for the SeekHead.
const SEEK_HEAD_RESERVED: usize = 96;
/// 8-byte EBML size with every value bit set.
const UNKNOWN_SIZE: [u8; 8] = [0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];

// ============================================================================
// EBML encoding
// ============================================================================

fn put_id(out: &mut Vec<u8>, id: u32) {
    let bytes = id.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    out.extend_from_slice(&bytes[skip..]);
}

fn put_size(out: &mut Vec<u8>, size: u64) {
    let len = (1..=8usize)
        .find(|&len| size < (1u64 << (7 * len)) - 1)
        .unwrap_or(8);
    let marked = size | (1u64 << (7 * len));
    out.extend_from_slice(&marked.to_be_bytes()[8 - len..]);
}

/// 8-byte size field, used where the value is patched later.
fn fixed_size(size: u64) -> [u8; 8] {
    (size | (1u64 << 56)).to_be_bytes()
}

fn put_element(out: &mut Vec<u8>, id: u32, body: &[u8]) {
    put_id(out, id);
    put_size(out, body.len() as u64);
    out.extend_from_slice(body);
}

fn put_uint(out: &mut Vec<u8>, id: u32, value: u64) {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count().min(7);
    put_element(out, id, &bytes[skip..]);
}

fn put_str(out: &mut Vec<u8>, id: u32, value: &str) {
    put_element(out, id, value.as_bytes());
}

fn put_void(out: &mut Vec<u8>, total: usize) {
    // total = 1 (id) + 1 (size) + body, for totals below 129
    let body = total.saturating_sub(2);
    put_id(out, VOID);
    put_size(out, body as u64);
    out.resize(out.len() + body, 0);
}

// ============================================================================
// Writer
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct OpenCluster {
    size_at: u64,
    data_at: u64,
    timestamp: i64,
    blocks: u32,
}

#[derive(Debug, Clone, Copy)]
struct CuePoint {
    time: u64,
    cluster_position: u64,
}

/// Matroska writer over any seekable sink.
pub struct MatroskaWriter<W: Write + Seek> {
    sink: W,
    segment_size_at: u64,
    segment_data_at: u64,
    seek_head_at: u64,
    info_at: u64,
    tracks_at: u64,
    duration_at: u64,
    cluster: Option<OpenCluster>,
    cues: Vec<CuePoint>,
    end_time: i64,
    blocks: u64,
    clusters: u64,
}

impl<W: Write + Seek> MatroskaWriter<W> {
    fn pos(&mut self) -> Result<u64> {
        Ok(self.sink.stream_position()?)
    }

    fn write_headers(&mut self, params: &CodecParameters, options: &FormatOptions) -> Result<()> {
        let mut ebml = Vec::new();
        put_uint(&mut ebml, EBML_VERSION, 1);
        put_uint(&mut ebml, EBML_READ_VERSION, 1);
        put_uint(&mut ebml, EBML_MAX_ID_LENGTH, 4);
        put_uint(&mut ebml, EBML_MAX_SIZE_LENGTH, 8);
        put_str(&mut ebml, DOC_TYPE, "matroska");
        put_uint(&mut ebml, DOC_TYPE_VERSION, 4);
        put_uint(&mut ebml, DOC_TYPE_READ_VERSION, 2);
        let mut head = Vec::new();
        put_element(&mut head, EBML, &ebml);
        self.sink.write_all(&head)?;

        let mut segment = Vec::new();
        put_id(&mut segment, SEGMENT);
        self.sink.write_all(&segment)?;
        self.segment_size_at = self.pos()?;
        self.sink.write_all(&UNKNOWN_SIZE)?;
        self.segment_data_at = self.pos()?;

        self.seek_head_at = self.pos()?;
        let mut void = Vec::new();
        put_void(&mut void, SEEK_HEAD_RESERVED);
        self.sink.write_all(&void)?;

        // Info
        self.info_at = self.pos()?;
        let muxing_app = concat!("recorda ", env!("CARGO_PKG_VERSION"));
        let mut info = Vec::new();
        put_uint(&mut info, TIMESTAMP_SCALE, 1_000_000);
        put_id(&mut info, DURATION);
        put_size(&mut info, 8);
        let duration_offset = info.len();
        info.extend_from_slice(&0f64.to_be_bytes());
        put_str(&mut info, MUXING_APP, muxing_app);
        put_str(
            &mut info,
            WRITING_APP,
            options.writing_app.as_deref().unwrap_or(muxing_app),
        );
        let mut info_element = Vec::new();
        put_id(&mut info_element, INFO);
        put_size(&mut info_element, info.len() as u64);
        let info_header = info_element.len();
        info_element.extend_from_slice(&info);
        self.duration_at = self.info_at + (info_header + duration_offset) as u64;
        self.sink.write_all(&info_element)?;

        // Tracks
        let avcc = params
            .avc_decoder_config()
            .map_err(|e| Error::ContainerHeader(e.to_string()))?;
        let mut video = Vec::new();
        put_uint(&mut video, PIXEL_WIDTH, params.width as u64);
        put_uint(&mut video, PIXEL_HEIGHT, params.height as u64);

        let mut entry = Vec::new();
        put_uint(&mut entry, TRACK_NUMBER, 1);
        put_uint(&mut entry, TRACK_UID, 1);
        put_uint(&mut entry, TRACK_TYPE, TRACK_TYPE_VIDEO);
        put_uint(&mut entry, FLAG_LACING, 0);
        put_str(&mut entry, LANGUAGE, "und");
        put_str(&mut entry, CODEC_ID, "V_MPEG4/ISO/AVC");
        put_element(&mut entry, CODEC_PRIVATE, &avcc);
        put_uint(&mut entry, DEFAULT_DURATION, params.frame_duration_ns());
        put_element(&mut entry, VIDEO, &video);

        let mut tracks = Vec::new();
        put_element(&mut tracks, TRACK_ENTRY, &entry);
        let mut tracks_element = Vec::new();
        put_element(&mut tracks_element, TRACKS, &tracks);
        self.tracks_at = self.pos()?;
        self.sink.write_all(&tracks_element)?;
        Ok(())
    }

    fn close_cluster(&mut self) -> Result<()> {
        if let Some(cluster) = self.cluster.take() {
            let end = self.pos()?;
            self.sink.seek(SeekFrom::Start(cluster.size_at))?;
            self.sink.write_all(&fixed_size(end - cluster.data_at))?;
            self.sink.seek(SeekFrom::Start(end))?;
        }
        Ok(())
    }

    fn open_cluster(&mut self, timestamp: i64) -> Result<OpenCluster> {
        self.close_cluster()?;

        let position = self.pos()? - self.segment_data_at;
        let mut header = Vec::new();
        put_id(&mut header, CLUSTER);
        self.sink.write_all(&header)?;
        let size_at = self.pos()?;
        self.sink.write_all(&UNKNOWN_SIZE)?;
        let data_at = self.pos()?;

        let mut ts = Vec::new();
        put_uint(&mut ts, TIMESTAMP, timestamp as u64);
        self.sink.write_all(&ts)?;

        let cluster = OpenCluster {
            size_at,
            data_at,
            timestamp,
            blocks: 0,
        };
        self.cluster = Some(cluster);
        self.clusters += 1;
        tracing::trace!(timestamp, position, "Opened cluster");
        Ok(cluster)
    }

    fn segment_position(&self, absolute: u64) -> u64 {
        absolute - self.segment_data_at
    }

    fn write_seek_head(&mut self, cues_at: Option<u64>) -> Result<()> {
        let mut entries = vec![(INFO, self.info_at), (TRACKS, self.tracks_at)];
        if let Some(cues) = cues_at {
            entries.push((CUES, cues));
        }

        let mut body = Vec::new();
        for (id, at) in entries {
            let mut seek = Vec::new();
            put_element(&mut seek, SEEK_ID, &id.to_be_bytes());
            put_id(&mut seek, SEEK_POSITION);
            put_size(&mut seek, 8);
            seek.extend_from_slice(&self.segment_position(at).to_be_bytes());
            put_element(&mut body, SEEK, &seek);
        }
        let mut head = Vec::new();
        put_element(&mut head, SEEK_HEAD, &body);
        put_void(&mut head, SEEK_HEAD_RESERVED - head.len());
        if head.len() != SEEK_HEAD_RESERVED {
            return Err(Error::TrailerWrite("SeekHead does not fit its reservation".to_string()));
        }

        self.sink.seek(SeekFrom::Start(self.seek_head_at))?;
        self.sink.write_all(&head)?;
        Ok(())
    }

    /// Number of clusters started so far.
    pub fn cluster_count(&self) -> u64 {
        self.clusters
    }
}

impl<W: Write + Seek + Send> ContainerWriter<W> for MatroskaWriter<W> {
    const FORMAT: OutputFormat = OutputFormat::Mkv;

    fn stream_time_base(_params: &CodecParameters) -> TimeBase {
        TimeBase::MILLISECONDS
    }

    fn start(sink: W, stream: &Stream, options: &FormatOptions) -> Result<Self> {
        let mut writer = Self {
            sink,
            segment_size_at: 0,
            segment_data_at: 0,
            seek_head_at: 0,
            info_at: 0,
            tracks_at: 0,
            duration_at: 0,
            cluster: None,
            cues: Vec::new(),
            end_time: 0,
            blocks: 0,
            clusters: 0,
        };
        writer.write_headers(&stream.params, options).map_err(|e| match e {
            Error::ContainerHeader(_) => e,
            other => Error::ContainerHeader(other.to_string()),
        })?;
        Ok(writer)
    }

    fn write_packet(&mut self, packet: Packet) -> Result<()> {
        if packet.pts < 0 {
            return Err(Error::Encode(format!(
                "negative presentation time {} in Matroska track",
                packet.pts
            )));
        }

        let fits = |c: &OpenCluster| i16::try_from(packet.pts - c.timestamp).is_ok();
        let current = self.cluster;
        let cluster = match current {
            Some(c) if fits(&c) && !(packet.keyframe && c.blocks > 0) => c,
            _ => self.open_cluster(packet.pts)?,
        };

        if packet.keyframe {
            let cluster_position = self.segment_position(cluster.data_at)
                - (CLUSTER.to_be_bytes().len() + UNKNOWN_SIZE.len()) as u64;
            self.cues.push(CuePoint {
                time: packet.pts as u64,
                cluster_position,
            });
        }

        let payload = nal::annex_b_to_avcc(&packet.data);
        let relative = (packet.pts - cluster.timestamp) as i16;
        let mut block = Vec::with_capacity(payload.len() + 4);
        block.push(0x81); // track 1
        block.extend_from_slice(&relative.to_be_bytes());
        block.push(if packet.keyframe { SIMPLE_BLOCK_KEYFRAME } else { 0 });
        block.extend_from_slice(&payload);

        let mut element = Vec::with_capacity(block.len() + 9);
        put_element(&mut element, SIMPLE_BLOCK, &block);
        self.sink.write_all(&element)?;

        if let Some(c) = self.cluster.as_mut() {
            c.blocks += 1;
        }
        self.blocks += 1;
        self.end_time = self.end_time.max(packet.pts + packet.duration.max(0));
        Ok(())
    }

    fn finish(mut self) -> Result<W> {
        self.close_cluster()?;

        let cues_at = if self.cues.is_empty() {
            None
        } else {
            let mut body = Vec::new();
            for cue in &self.cues {
                let mut positions = Vec::new();
                put_uint(&mut positions, CUE_TRACK, 1);
                put_uint(&mut positions, CUE_CLUSTER_POSITION, cue.cluster_position);
                let mut point = Vec::new();
                put_uint(&mut point, CUE_TIME, cue.time);
                put_element(&mut point, CUE_TRACK_POSITIONS, &positions);
                put_element(&mut body, CUE_POINT, &point);
            }
            let mut cues = Vec::new();
            put_element(&mut cues, CUES, &body);
            let at = self.pos()?;
            self.sink.write_all(&cues)?;
            Some(at)
        };
        let end = self.pos()?;

        self.write_seek_head(cues_at)?;
        self.sink.seek(SeekFrom::Start(self.duration_at))?;
        self.sink.write_all(&(self.end_time as f64).to_be_bytes())?;
        self.sink.seek(SeekFrom::Start(self.segment_size_at))?;
        self.sink.write_all(&fixed_size(end - self.segment_data_at))?;
        self.sink.seek(SeekFrom::Start(end))?;
        self.sink.flush()?;

        tracing::debug!(
            blocks = self.blocks,
            clusters = self.clusters,
            duration_ms = self.end_time,
            "Finished Matroska file"
        );
        Ok(self.sink)
    }
}

impl<W: Write + Seek> std::fmt::Debug for MatroskaWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatroskaWriter")
            .field("blocks", &self.blocks)
            .field("clusters", &self.clusters)
            .field("cues", &self.cues.len())
            .field("end_time", &self.end_time)
            .finish()
    }
}
