//! JPEG APP1/Exif segment splicing

use super::MetadataError;

/// Identifier that opens every Exif APP1 payload
pub const EXIF_HEADER: &[u8; 6] = b"Exif\0\0";

const MARKER_PREFIX: u8 = 0xFF;
const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const APP0: u8 = 0xE0;
const APP1: u8 = 0xE1;

/// Largest value the 16-bit segment length field can hold
const MAX_SEGMENT_LEN: usize = u16::MAX as usize;

/// Prefix a TIFF structure with the Exif identifier unless it already has it.
pub fn ensure_exif_header(bytes: Vec<u8>) -> Vec<u8> {
    if bytes.starts_with(EXIF_HEADER) {
        bytes
    } else {
        let mut prefixed = Vec::with_capacity(bytes.len() + EXIF_HEADER.len());
        prefixed.extend_from_slice(EXIF_HEADER);
        prefixed.extend_from_slice(&bytes);
        prefixed
    }
}

fn is_standalone(marker: u8) -> bool {
    marker == 0x01 || (0xD0..=0xD7).contains(&marker)
}

/// A marker segment located before the start-of-scan
struct Segment {
    marker: u8,
    start: usize,
    end: usize,
}

/// Walks the header segments of `jpeg` up to the start-of-scan.
///
/// Returns the segments and the offset of the SOS marker.
fn header_segments(jpeg: &[u8]) -> Result<(Vec<Segment>, usize), MetadataError> {
    if jpeg.len() < 4 || jpeg[0] != MARKER_PREFIX || jpeg[1] != SOI {
        return Err(MetadataError::MalformedTarget("missing start-of-image marker".to_string()));
    }

    let mut segments = Vec::new();
    let mut pos = 2;
    loop {
        if jpeg.get(pos) != Some(&MARKER_PREFIX) {
            return Err(MetadataError::MalformedTarget(format!(
                "expected marker at offset {}",
                pos
            )));
        }
        // Fill bytes
        while jpeg.get(pos + 1) == Some(&MARKER_PREFIX) {
            pos += 1;
        }
        let marker = *jpeg
            .get(pos + 1)
            .ok_or_else(|| MetadataError::MalformedTarget("truncated marker".to_string()))?;

        match marker {
            SOS => return Ok((segments, pos)),
            EOI => {
                return Err(MetadataError::MalformedTarget(
                    "end-of-image before scan data".to_string(),
                ))
            }
            m if is_standalone(m) => {
                segments.push(Segment {
                    marker,
                    start: pos,
                    end: pos + 2,
                });
                pos += 2;
            }
            _ => {
                let len_bytes = jpeg.get(pos + 2..pos + 4).ok_or_else(|| {
                    MetadataError::MalformedTarget("truncated segment length".to_string())
                })?;
                let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
                let end = pos + 2 + len;
                if len < 2 || end > jpeg.len() {
                    return Err(MetadataError::MalformedTarget(format!(
                        "segment 0x{:02X} at offset {} has invalid length {}",
                        marker, pos, len
                    )));
                }
                segments.push(Segment {
                    marker,
                    start: pos,
                    end,
                });
                pos = end;
            }
        }
    }
}

/// Insert `tiff` as an Exif APP1 segment near the start of `jpeg`.
///
/// Existing Exif APP1 segments are dropped. The new segment goes right after
/// SOI, or after a leading JFIF APP0 segment when there is one. Everything
/// from the start-of-scan onwards is copied through untouched.
pub fn insert_exif_segment(jpeg: &[u8], tiff: &[u8]) -> Result<Vec<u8>, MetadataError> {
    let payload = ensure_exif_header(tiff.to_vec());
    let segment_len = payload.len() + 2;
    if segment_len > MAX_SEGMENT_LEN {
        return Err(MetadataError::SegmentTooLarge(payload.len()));
    }

    let (segments, scan_start) = header_segments(jpeg)?;

    let mut out = Vec::with_capacity(jpeg.len() + segment_len + 2);
    out.extend_from_slice(&jpeg[..2]);

    let mut exif_written = false;
    let write_exif = |out: &mut Vec<u8>| {
        out.extend_from_slice(&[MARKER_PREFIX, APP1]);
        out.extend_from_slice(&(segment_len as u16).to_be_bytes());
        out.extend_from_slice(&payload);
    };

    for (index, segment) in segments.iter().enumerate() {
        let bytes = &jpeg[segment.start..segment.end];
        let is_exif = segment.marker == APP1 && bytes.get(4..10) == Some(&EXIF_HEADER[..]);

        if !exif_written && !(index == 0 && segment.marker == APP0) {
            write_exif(&mut out);
            exif_written = true;
        }
        if !is_exif {
            out.extend_from_slice(bytes);
        }
    }
    if !exif_written {
        write_exif(&mut out);
    }

    out.extend_from_slice(&jpeg[scan_start..]);
    Ok(out)
}
