//! Structural checks on files produced by the recorder.
//!
//! Each container is parsed back with a small reader (or the `mp4` crate)
//! and compared against what the recorder reports.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use recorda::capture::PatternSource;
use recorda::config::{FormatOptions, RecorderConfig};
use recorda::{CodecType, OutputFormat, Recorder, RecordingStats};

const FPS: u32 = 25;

fn record(
    format: OutputFormat,
    path: &Path,
    frames: u64,
    options: Option<FormatOptions>,
) -> RecordingStats {
    let mut config = RecorderConfig::new();
    if let Some(options) = options {
        config = config.format_options(options);
    }
    let mut recorder =
        Recorder::with_config(format, CodecType::H264, config).expect("Should create recorder");
    recorder.open(path, 160, 120, FPS).expect("Should open");

    let source = PatternSource::new(160, 120);
    for i in 0..frames {
        let image = source.render(i);
        recorder
            .write_rgb(image.data(), image.width(), image.height())
            .expect("Should write frame");
    }
    recorder.close().expect("Should close");
    recorder.stats()
}

// ============================================================================
// AVI
// ============================================================================

fn le32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn find_tag(data: &[u8], tag: &[u8; 4]) -> usize {
    data.windows(4)
        .position(|w| w == tag)
        .expect("Should contain tag")
}

#[test]
fn test_avi_headers_and_index() {
    let dir = tempfile::tempdir().expect("Should create temp dir");
    let path = dir.path().join("bars.avi");
    let stats = record(OutputFormat::Avi, &path, 12, None);

    let data = fs::read(&path).expect("Should read file");
    assert_eq!(&data[0..4], b"RIFF");
    assert_eq!(le32(&data, 4) as usize, data.len() - 8);
    assert_eq!(&data[8..12], b"AVI ");

    let avih = find_tag(&data, b"avih");
    assert_eq!(le32(&data, avih + 8), 1_000_000 / FPS);
    assert_eq!(le32(&data, avih + 8 + 16), 12); // total frames
    assert_eq!(le32(&data, avih + 8 + 32), 160);
    assert_eq!(le32(&data, avih + 8 + 36), 120);

    let strh = find_tag(&data, b"strh");
    assert_eq!(&data[strh + 8..strh + 12], b"vids");
    assert_eq!(&data[strh + 12..strh + 16], b"H264");
    assert_eq!(le32(&data, strh + 8 + 20), 1); // scale
    assert_eq!(le32(&data, strh + 8 + 24), FPS); // rate

    // One index entry per frame, keyframes flagged
    let idx1 = find_tag(&data, b"idx1");
    let entries = le32(&data, idx1 + 4) as usize / 16;
    assert_eq!(entries, 12);
    let keyframes = (0..entries)
        .filter(|i| le32(&data, idx1 + 8 + i * 16 + 4) & 0x10 != 0)
        .count() as u64;
    assert_eq!(keyframes, stats.keyframes);

    // Payload starts with an Annex-B start code
    let movi = find_tag(&data, b"movi");
    let first = le32(&data, idx1 + 8 + 8) as usize;
    let payload = movi + first + 8;
    assert_eq!(&data[payload..payload + 4], &[0, 0, 0, 1]);
}

// ============================================================================
// Matroska
// ============================================================================

const SEGMENT: u32 = 0x1853_8067;
const INFO: u32 = 0x1549_A966;
const DURATION: u32 = 0x4489;
const WRITING_APP: u32 = 0x5741;
const TRACKS: u32 = 0x1654_AE6B;
const TRACK_ENTRY: u32 = 0xAE;
const CODEC_ID: u32 = 0x86;
const CODEC_PRIVATE: u32 = 0x63A2;
const CLUSTER: u32 = 0x1F43_B675;
const SIMPLE_BLOCK: u32 = 0xA3;
const CUES: u32 = 0x1C53_BB6B;
const CUE_POINT: u32 = 0xBB;

fn read_vint(data: &[u8], at: usize, keep_marker: bool) -> (u64, usize) {
    let first = data[at];
    let len = first.leading_zeros() as usize + 1;
    let mut value = if keep_marker {
        first as u64
    } else {
        (first as u64) & ((1u64 << (8 - len)) - 1)
    };
    for i in 1..len {
        value = (value << 8) | data[at + i] as u64;
    }
    (value, len)
}

/// `(id, body offset, body length)` of each element in `data[start..end]`.
fn elements(data: &[u8], start: usize, end: usize) -> Vec<(u32, usize, usize)> {
    let mut out = Vec::new();
    let mut at = start;
    while at < end {
        let (id, id_len) = read_vint(data, at, true);
        let (size, size_len) = read_vint(data, at + id_len, false);
        let body = at + id_len + size_len;
        out.push((id as u32, body, size as usize));
        at = body + size as usize;
    }
    out
}

fn child(list: &[(u32, usize, usize)], id: u32) -> (usize, usize) {
    list.iter()
        .find(|(i, _, _)| *i == id)
        .map(|&(_, body, len)| (body, len))
        .expect("Should contain element")
}

#[test]
fn test_matroska_blocks_cues_and_duration() {
    let dir = tempfile::tempdir().expect("Should create temp dir");
    let path = dir.path().join("bars.mkv");
    let options = FormatOptions::new().writing_app("container-test");
    let stats = record(OutputFormat::Mkv, &path, 25, Some(options));

    let data = fs::read(&path).expect("Should read file");
    let top = elements(&data, 0, data.len());
    let (seg, seg_len) = child(&top, SEGMENT);
    assert_eq!(seg + seg_len, data.len());
    let segment = elements(&data, seg, seg + seg_len);

    let (info, info_len) = child(&segment, INFO);
    let info = elements(&data, info, info + info_len);
    let (dur, dur_len) = child(&info, DURATION);
    assert_eq!(dur_len, 8);
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data[dur..dur + 8]);
    assert_eq!(f64::from_be_bytes(raw), 1000.0);
    let (app, app_len) = child(&info, WRITING_APP);
    assert_eq!(&data[app..app + app_len], b"container-test");

    let (tracks, tracks_len) = child(&segment, TRACKS);
    let tracks = elements(&data, tracks, tracks + tracks_len);
    let (entry, entry_len) = child(&tracks, TRACK_ENTRY);
    let entry = elements(&data, entry, entry + entry_len);
    let (codec, codec_len) = child(&entry, CODEC_ID);
    assert_eq!(&data[codec..codec + codec_len], b"V_MPEG4/ISO/AVC");
    let (private, _) = child(&entry, CODEC_PRIVATE);
    assert_eq!(data[private], 1); // avcC version

    let mut blocks = 0u64;
    let mut key_blocks = 0u64;
    for &(_, body, len) in segment.iter().filter(|(id, _, _)| *id == CLUSTER) {
        for (id, block, _) in elements(&data, body, body + len) {
            if id == SIMPLE_BLOCK {
                blocks += 1;
                if data[block + 3] & 0x80 != 0 {
                    key_blocks += 1;
                }
            }
        }
    }
    assert_eq!(blocks, stats.packets);
    assert_eq!(key_blocks, stats.keyframes);

    let (cues, cues_len) = child(&segment, CUES);
    let cue_points = elements(&data, cues, cues + cues_len)
        .into_iter()
        .filter(|(id, _, _)| *id == CUE_POINT)
        .count() as u64;
    assert_eq!(cue_points, stats.keyframes);
}

// ============================================================================
// MP4
// ============================================================================

/// Top-level box types, skipping `free`/`wide` padding.
fn top_level_boxes(data: &[u8]) -> Vec<[u8; 4]> {
    let mut kinds = Vec::new();
    let mut at = 0;
    while at + 8 <= data.len() {
        let size =
            u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]) as usize;
        let kind = [data[at + 4], data[at + 5], data[at + 6], data[at + 7]];
        assert!(size >= 8, "box at {} has size {}", at, size);
        if &kind != b"free" && &kind != b"wide" {
            kinds.push(kind);
        }
        at += size;
    }
    assert_eq!(at, data.len());
    kinds
}

#[test]
fn test_mp4_brand_faststart_and_writing_app() {
    let dir = tempfile::tempdir().expect("Should create temp dir");
    let path = dir.path().join("bars.mp4");
    let options = FormatOptions::new()
        .faststart(true)
        .major_brand("mp42")
        .writing_app("container-test");
    let stats = record(OutputFormat::Mp4, &path, 20, Some(options));

    let data = fs::read(&path).expect("Should read file");
    assert_eq!(&data[8..12], b"mp42");
    assert_eq!(top_level_boxes(&data), vec![*b"ftyp", *b"moov", *b"mdat"]);

    let tag = b"container-test";
    assert!(data.windows(tag.len()).any(|w| w == tag));

    let size = data.len() as u64;
    let mut reader =
        mp4::Mp4Reader::read_header(Cursor::new(data), size).expect("Should parse MP4");
    assert_eq!(reader.tracks()[&1].sample_count() as u64, stats.packets);

    // Chunk offsets were moved along with mdat: samples still decode as AVCC
    let sample = reader
        .read_sample(1, 1)
        .expect("Should read sample")
        .expect("Should have sample");
    assert!(sample.is_sync);
    let first_len =
        u32::from_be_bytes([sample.bytes[0], sample.bytes[1], sample.bytes[2], sample.bytes[3]]);
    assert!(first_len as usize <= sample.bytes.len() - 4);
    assert_ne!(&sample.bytes[0..4], &[0, 0, 0, 1]);
}

#[test]
fn test_mp4_without_options_is_plain() {
    let dir = tempfile::tempdir().expect("Should create temp dir");
    let path = dir.path().join("plain.mp4");
    record(OutputFormat::Mp4, &path, 5, Some(FormatOptions::new()));

    let data = fs::read(&path).expect("Should read file");
    assert_eq!(&data[8..12], b"isom");
    assert_eq!(top_level_boxes(&data), vec![*b"ftyp", *b"mdat", *b"moov"]);
}
