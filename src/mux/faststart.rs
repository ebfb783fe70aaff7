//! MP4 post-processing: writing application tag and `moov` relocation.
//!
//! The `mp4` crate writes `ftyp`, `mdat`, `moov` in that order. Players
//! streaming the file want `moov` first, so with faststart enabled the
//! finished file is rewritten in place:
//!
//! ```text
//! before:  ftyp | mdat ......... | moov
//! after:   ftyp | moov' | mdat .........
//! ```
//!
//! Every chunk offset in `stco`/`co64` grows by the size of `moov'`. The
//! media data is shifted by copying backwards in fixed-size chunks, so the
//! file is never read into memory as a whole.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::config::FormatOptions;

const COPY_CHUNK: usize = 64 * 1024;
const MAX_MOOV_SIZE: u64 = 256 * 1024 * 1024;

/// A top-level box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BoxInfo {
    kind: [u8; 4],
    offset: u64,
    size: u64,
}

/// Header of a box inside an in-memory buffer.
#[derive(Debug, Clone, Copy)]
struct Header {
    kind: [u8; 4],
    header_len: usize,
    size: usize,
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn read_top_level<F: Read + Seek>(file: &mut F) -> io::Result<Vec<BoxInfo>> {
    let end = file.seek(SeekFrom::End(0))?;
    let mut boxes = Vec::new();
    let mut offset = 0u64;

    while offset + 8 <= end {
        file.seek(SeekFrom::Start(offset))?;
        let mut header = [0u8; 8];
        file.read_exact(&mut header)?;
        let size32 = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let kind = [header[4], header[5], header[6], header[7]];

        let size = match size32 {
            0 => end - offset,
            1 => {
                let mut large = [0u8; 8];
                file.read_exact(&mut large)?;
                u64::from_be_bytes(large)
            }
            n => n as u64,
        };
        if size < 8 || offset + size > end {
            return Err(invalid(format!(
                "box '{}' at {} has bad size {}",
                String::from_utf8_lossy(&kind),
                offset,
                size
            )));
        }
        boxes.push(BoxInfo { kind, offset, size });
        offset += size;
    }
    Ok(boxes)
}

fn parse_header(data: &[u8], at: usize) -> Option<Header> {
    let head = data.get(at..at + 8)?;
    let size32 = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
    let kind = [head[4], head[5], head[6], head[7]];
    let (header_len, size) = match size32 {
        0 => (8, data.len() - at),
        1 => {
            let large = data.get(at + 8..at + 16)?;
            let mut buf = [0u8; 8];
            buf.copy_from_slice(large);
            (16, usize::try_from(u64::from_be_bytes(buf)).ok()?)
        }
        n => (8, n as usize),
    };
    if size < header_len || at + size > data.len() {
        return None;
    }
    Some(Header {
        kind,
        header_len,
        size,
    })
}

/// Add `delta` to every chunk offset below `data[start..end]`.
fn shift_chunk_offsets(data: &mut [u8], start: usize, end: usize, delta: u64) -> io::Result<()> {
    let mut at = start;
    while at < end {
        let header =
            parse_header(&data[..end], at).ok_or_else(|| invalid("truncated box in moov"))?;
        let body = at + header.header_len;
        let box_end = at + header.size;

        match &header.kind {
            b"trak" | b"mdia" | b"minf" | b"stbl" => {
                shift_chunk_offsets(data, body, box_end, delta)?;
            }
            b"stco" | b"co64" => {
                let wide = &header.kind == b"co64";
                let count_at = body + 4;
                let count = data
                    .get(count_at..count_at + 4)
                    .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize)
                    .ok_or_else(|| invalid("truncated chunk offset table"))?;
                let width = if wide { 8 } else { 4 };
                let table = count_at + 4;
                if table + count * width > box_end {
                    return Err(invalid("chunk offset table exceeds its box"));
                }
                for i in 0..count {
                    let entry = &mut data[table + i * width..table + (i + 1) * width];
                    if wide {
                        let mut buf = [0u8; 8];
                        buf.copy_from_slice(entry);
                        let value = u64::from_be_bytes(buf) + delta;
                        entry.copy_from_slice(&value.to_be_bytes());
                    } else {
                        let value = u32::from_be_bytes([entry[0], entry[1], entry[2], entry[3]]);
                        let value = u32::try_from(value as u64 + delta).map_err(|_| {
                            invalid("chunk offset overflows 32 bits after relocation")
                        })?;
                        entry.copy_from_slice(&value.to_be_bytes());
                    }
                }
            }
            _ => {}
        }
        at = box_end;
    }
    Ok(())
}

fn has_child(data: &[u8], start: usize, kind: &[u8; 4]) -> bool {
    let mut at = start;
    while let Some(header) = parse_header(data, at) {
        if &header.kind == kind {
            return true;
        }
        at += header.size;
    }
    false
}

fn push_box(out: &mut Vec<u8>, kind: &[u8; 4], body: &[u8]) {
    out.extend_from_slice(&((body.len() + 8) as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(body);
}

/// `udta/meta/{hdlr,ilst/©too/data}` carrying the writing application.
fn writing_app_udta(app: &str) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&1u32.to_be_bytes()); // UTF-8
    data.extend_from_slice(&0u32.to_be_bytes()); // locale
    data.extend_from_slice(app.as_bytes());
    let mut tool = Vec::new();
    push_box(&mut tool, b"data", &data);
    let mut ilst = Vec::new();
    push_box(&mut ilst, b"\xa9too", &tool);

    let mut hdlr = Vec::new();
    hdlr.extend_from_slice(&[0; 4]); // version, flags
    hdlr.extend_from_slice(&[0; 4]); // pre_defined
    hdlr.extend_from_slice(b"mdir");
    hdlr.extend_from_slice(b"appl");
    hdlr.extend_from_slice(&[0; 8]);
    hdlr.push(0); // empty name

    let mut meta = vec![0; 4]; // version, flags
    push_box(&mut meta, b"hdlr", &hdlr);
    push_box(&mut meta, b"ilst", &ilst);

    let mut udta_body = Vec::new();
    push_box(&mut udta_body, b"meta", &meta);
    let mut udta = Vec::new();
    push_box(&mut udta, b"udta", &udta_body);
    udta
}

/// Rewrite the size field of the box at the start of `data`.
fn set_box_size(data: &mut [u8]) -> io::Result<()> {
    let size = data.len() as u64;
    match u32::from_be_bytes([data[0], data[1], data[2], data[3]]) {
        1 => data[8..16].copy_from_slice(&size.to_be_bytes()),
        _ => {
            let size = u32::try_from(size).map_err(|_| invalid("moov larger than 4 GiB"))?;
            data[0..4].copy_from_slice(&size.to_be_bytes());
        }
    }
    Ok(())
}

fn shift_forward<F: Read + Write + Seek>(
    file: &mut F,
    start: u64,
    end: u64,
    delta: u64,
) -> io::Result<()> {
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut remaining = end - start;
    while remaining > 0 {
        let n = remaining.min(COPY_CHUNK as u64);
        let src = start + remaining - n;
        file.seek(SeekFrom::Start(src))?;
        file.read_exact(&mut buf[..n as usize])?;
        file.seek(SeekFrom::Start(src + delta))?;
        file.write_all(&buf[..n as usize])?;
        remaining -= n;
    }
    Ok(())
}

/// Apply the MP4 format options to a finished file.
///
/// Returns `Ok(false)` and leaves the file untouched when the layout is
/// not the expected `... mdat ... moov` or when relocation would overflow a
/// 32-bit chunk offset.
pub fn optimize<F: Read + Write + Seek>(file: &mut F, options: &FormatOptions) -> io::Result<bool> {
    let boxes = read_top_level(file)?;
    let Some(moov_pos) = boxes.iter().position(|b| &b.kind == b"moov") else {
        return Ok(false);
    };
    let moov = boxes[moov_pos];
    let mdat_before = boxes[..moov_pos].iter().any(|b| &b.kind == b"mdat");
    if moov_pos != boxes.len() - 1 || !mdat_before || moov.size > MAX_MOOV_SIZE {
        return Ok(false);
    }

    let mut new_moov = vec![0u8; moov.size as usize];
    file.seek(SeekFrom::Start(moov.offset))?;
    file.read_exact(&mut new_moov)?;

    let moov_header = parse_header(&new_moov, 0).ok_or_else(|| invalid("bad moov header"))?;
    let mut changed = false;
    if let Some(app) = options.writing_app.as_deref() {
        if !has_child(&new_moov, moov_header.header_len, b"udta") {
            new_moov.extend_from_slice(&writing_app_udta(app));
            set_box_size(&mut new_moov)?;
            changed = true;
        }
    }

    if !options.faststart {
        if changed {
            file.seek(SeekFrom::Start(moov.offset))?;
            file.write_all(&new_moov)?;
            file.flush()?;
        }
        return Ok(true);
    }

    // Insert right after ftyp when it leads the file.
    let insert_at = match boxes.first() {
        Some(first) if &first.kind == b"ftyp" => first.offset + first.size,
        _ => 0,
    };
    let delta = new_moov.len() as u64;
    let moov_end = new_moov.len();
    if let Err(e) = shift_chunk_offsets(&mut new_moov, moov_header.header_len, moov_end, delta) {
        tracing::warn!(error = %e, "Cannot relocate moov");
        return Ok(false);
    }

    shift_forward(file, insert_at, moov.offset, delta)?;
    file.seek(SeekFrom::Start(insert_at))?;
    file.write_all(&new_moov)?;
    file.flush()?;

    tracing::debug!(moov_bytes = delta, "Moved moov in front of media data");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn be32(data: &[u8], at: usize) -> u32 {
        u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
    }

    fn boxed(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        push_box(&mut out, kind, body);
        out
    }

    /// ftyp | mdat(payload) | moov(trak/mdia/minf/stbl/stco -> payload)
    fn sample_file(payload: &[u8]) -> Vec<u8> {
        let ftyp = boxed(b"ftyp", b"isom\0\0\x02\0isom");
        let mdat = boxed(b"mdat", payload);
        let payload_offset = (ftyp.len() + 8) as u32;

        let mut stco = vec![0; 4];
        stco.extend_from_slice(&1u32.to_be_bytes());
        stco.extend_from_slice(&payload_offset.to_be_bytes());
        let stbl = boxed(b"stbl", &boxed(b"stco", &stco));
        let minf = boxed(b"minf", &stbl);
        let mdia = boxed(b"mdia", &minf);
        let trak = boxed(b"trak", &mdia);
        let mut moov_body = boxed(b"mvhd", &[0; 100]);
        moov_body.extend_from_slice(&trak);
        let moov = boxed(b"moov", &moov_body);

        [ftyp, mdat, moov].concat()
    }

    fn stco_entry(data: &[u8]) -> u32 {
        let at = data
            .windows(4)
            .position(|w| w == b"stco")
            .expect("Should contain stco");
        be32(data, at + 12)
    }

    fn kinds(data: &[u8]) -> Vec<[u8; 4]> {
        read_top_level(&mut Cursor::new(data.to_vec()))
            .expect("Should parse boxes")
            .into_iter()
            .map(|b| b.kind)
            .collect()
    }

    #[test]
    fn test_faststart_moves_moov() {
        let payload = b"frame-data".repeat(20_000);
        let original = sample_file(&payload);
        let mut file = Cursor::new(original.clone());

        let options = FormatOptions::new().faststart(true);
        assert!(optimize(&mut file, &options).unwrap());
        let data = file.into_inner();

        assert_eq!(data.len(), original.len());
        assert_eq!(kinds(&data), vec![*b"ftyp", *b"moov", *b"mdat"]);

        let offset = stco_entry(&data) as usize;
        assert_eq!(&data[offset..offset + payload.len()], &payload[..]);
    }

    #[test]
    fn test_writing_app_in_place() {
        let original = sample_file(b"abc");
        let mut file = Cursor::new(original.clone());

        let options = FormatOptions::new().writing_app("recorda test");
        assert!(optimize(&mut file, &options).unwrap());
        let data = file.into_inner();

        assert!(data.len() > original.len());
        assert_eq!(kinds(&data), vec![*b"ftyp", *b"mdat", *b"moov"]);
        assert_eq!(stco_entry(&data), stco_entry(&original));
        let tool = data
            .windows(4)
            .position(|w| w == b"\xa9too")
            .expect("Should contain ©too");
        assert!(
            data[tool..]
                .windows(12)
                .any(|w| w == b"recorda test")
        );

        // A second pass does not add another udta.
        let mut again = Cursor::new(data.clone());
        assert!(optimize(&mut again, &options).unwrap());
        assert_eq!(again.into_inner(), data);
    }

    #[test]
    fn test_faststart_with_writing_app() {
        let payload = vec![7u8; 1000];
        let mut file = Cursor::new(sample_file(&payload));
        let options = FormatOptions::new().faststart(true).writing_app("x");
        assert!(optimize(&mut file, &options).unwrap());
        let data = file.into_inner();

        assert_eq!(kinds(&data), vec![*b"ftyp", *b"moov", *b"mdat"]);
        let offset = stco_entry(&data) as usize;
        assert_eq!(&data[offset..offset + payload.len()], &payload[..]);
    }

    #[test]
    fn test_unexpected_layout_is_left_alone() {
        // moov already first
        let ftyp = boxed(b"ftyp", b"isom\0\0\0\0");
        let moov = boxed(b"moov", &boxed(b"mvhd", &[0; 100]));
        let mdat = boxed(b"mdat", b"xyz");
        let original = [ftyp, moov, mdat].concat();

        let mut file = Cursor::new(original.clone());
        assert!(!optimize(&mut file, &FormatOptions::new().faststart(true)).unwrap());
        assert_eq!(file.into_inner(), original);
    }

    #[test]
    fn test_corrupt_box_size() {
        let mut data = sample_file(b"abc");
        data[3] = 0xFF; // ftyp claims 255 bytes
        let truncated = data[..200.min(data.len())].to_vec();
        let mut file = Cursor::new(truncated);
        assert!(optimize(&mut file, &FormatOptions::new().faststart(true)).is_err());
    }
}
