//! H.264 NAL unit helpers.
//!
//! Encoders emit Annex-B byte streams (start-code delimited). MP4 and
//! Matroska store length-prefixed NAL units (AVCC) and carry the parameter
//! sets out of band in an `avcC` record.

use crate::config::ParameterSets;
use crate::error::{Error, Result};

/// Coded slice of a non-IDR picture.
pub const NAL_SLICE: u8 = 1;
/// Coded slice of an IDR picture.
pub const NAL_IDR: u8 = 5;
/// Supplemental enhancement information.
pub const NAL_SEI: u8 = 6;
/// Sequence parameter set.
pub const NAL_SPS: u8 = 7;
/// Picture parameter set.
pub const NAL_PPS: u8 = 8;
/// Access unit delimiter.
pub const NAL_AUD: u8 = 9;

/// NAL unit type of a unit without its start code.
#[inline]
pub fn nal_type(nal: &[u8]) -> u8 {
    nal.first().map_or(0, |b| b & 0x1f)
}

/// Iterator over the NAL units of an Annex-B byte stream, without start codes.
#[derive(Debug, Clone)]
pub struct NalUnits<'a> {
    data: &'a [u8],
    pos: usize,
}

/// Split an Annex-B byte stream into NAL units.
pub fn split_annex_b(data: &[u8]) -> NalUnits<'_> {
    NalUnits {
        pos: find_start_code(data, 0).map_or(data.len(), |(_, end)| end),
        data,
    }
}

/// Find the next `00 00 01` start code at or after `from`.
///
/// Returns the index of the first byte of the start code (including a
/// leading zero of a four-byte code) and the index just past it.
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            let begin = if i > from && data[i - 1] == 0 { i - 1 } else { i };
            return Some((begin, i + 3));
        }
        i += 1;
    }
    None
}

impl<'a> Iterator for NalUnits<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        while self.pos < self.data.len() {
            let start = self.pos;
            let (end, next) = match find_start_code(self.data, start) {
                Some((begin, after)) => (begin, after),
                None => (self.data.len(), self.data.len()),
            };
            self.pos = next;

            // Trailing zero bytes belong to the next start code.
            let mut unit = &self.data[start..end];
            while let [rest @ .., 0] = unit {
                unit = rest;
            }
            if !unit.is_empty() {
                return Some(unit);
            }
        }
        None
    }
}

/// Whether an Annex-B access unit contains an IDR slice.
pub fn contains_idr(data: &[u8]) -> bool {
    split_annex_b(data).any(|nal| nal_type(nal) == NAL_IDR)
}

/// Extract the first SPS and PPS of an Annex-B byte stream.
pub fn parameter_sets(data: &[u8]) -> Option<ParameterSets> {
    let mut sps = None;
    let mut pps = None;
    for nal in split_annex_b(data) {
        match nal_type(nal) {
            NAL_SPS if sps.is_none() => sps = Some(nal),
            NAL_PPS if pps.is_none() => pps = Some(nal),
            _ => {}
        }
    }
    Some(ParameterSets::new(sps?, pps?))
}

/// Convert an Annex-B access unit to AVCC with 4-byte length prefixes.
///
/// Access unit delimiters are dropped.
pub fn annex_b_to_avcc(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 8);
    for nal in split_annex_b(data) {
        if nal_type(nal) == NAL_AUD {
            continue;
        }
        out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        out.extend_from_slice(nal);
    }
    out
}

/// Build an `AVCDecoderConfigurationRecord` (the payload of `avcC`).
pub fn avc_decoder_config(sets: &ParameterSets) -> Result<Vec<u8>> {
    let sps = &sets.sps;
    let pps = &sets.pps;
    if sps.len() < 4 || nal_type(sps) != NAL_SPS {
        return Err(Error::StreamCreation(
            "SPS is missing or truncated".to_string(),
        ));
    }
    if pps.is_empty() || nal_type(pps) != NAL_PPS {
        return Err(Error::StreamCreation("PPS is missing".to_string()));
    }
    if sps.len() > u16::MAX as usize || pps.len() > u16::MAX as usize {
        return Err(Error::StreamCreation(
            "parameter sets too large for avcC".to_string(),
        ));
    }

    let mut out = Vec::with_capacity(11 + sps.len() + pps.len());
    out.push(1); // configurationVersion
    out.push(sps[1]); // AVCProfileIndication
    out.push(sps[2]); // profile_compatibility
    out.push(sps[3]); // AVCLevelIndication
    out.push(0xfc | 3); // lengthSizeMinusOne = 3
    out.push(0xe0 | 1); // one SPS
    out.extend_from_slice(&(sps.len() as u16).to_be_bytes());
    out.extend_from_slice(sps);
    out.push(1); // one PPS
    out.extend_from_slice(&(pps.len() as u16).to_be_bytes());
    out.extend_from_slice(pps);
    Ok(out)
}
