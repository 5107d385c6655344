//! Capture metadata transplant
//!
//! Copies camera, lens and timestamp tags from a source image into a freshly
//! encoded JPEG. Metadata is best effort: [`transplant`] never fails and
//! hands back the target untouched when anything goes wrong.

pub mod segment;

pub use segment::{ensure_exif_header, insert_exif_segment, EXIF_HEADER};

use chrono::NaiveDate;
use exif::experimental::Writer;
use exif::{Field, In, Reader, Tag, Value};
use std::io::Cursor;
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;
use tracing::{debug, warn};

/// Error type for metadata operations; never surfaces outside this module
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("source carries no capture metadata")]
    NotFound,

    #[error("failed to read source metadata: {0}")]
    Read(String),

    #[error("failed to serialize metadata: {0}")]
    Write(String),

    #[error("malformed target JPEG: {0}")]
    MalformedTarget(String),

    #[error("metadata segment too large ({0} bytes)")]
    SegmentTooLarge(usize),

    #[error("metadata reader panicked")]
    Panicked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Text,
    Timestamp,
}

/// Tags carried over, in output order. Image IFD tags first, then Exif IFD.
const CAPTURED_TAGS: &[(Tag, FieldKind)] = &[
    (Tag::Make, FieldKind::Text),
    (Tag::Model, FieldKind::Text),
    (Tag::Software, FieldKind::Text),
    (Tag::DateTime, FieldKind::Timestamp),
    (Tag::DateTimeOriginal, FieldKind::Timestamp),
    (Tag::DateTimeDigitized, FieldKind::Timestamp),
    (Tag::SubSecTimeOriginal, FieldKind::Text),
    (Tag::SubSecTimeDigitized, FieldKind::Text),
    (Tag::LensMake, FieldKind::Text),
    (Tag::LensModel, FieldKind::Text),
];

/// Capture tags read from a source image
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapturedMetadata {
    entries: Vec<(Tag, String)>,
}

impl CapturedMetadata {
    /// Read the carried tags from any container kamadak-exif understands
    /// (HEIF, JPEG, TIFF, PNG, WebP).
    pub fn read(source: &[u8]) -> Result<Self, MetadataError> {
        let exif = Reader::new()
            .read_from_container(&mut Cursor::new(source))
            .map_err(|e| match e {
                exif::Error::NotFound(_) => MetadataError::NotFound,
                other => MetadataError::Read(other.to_string()),
            })?;

        let mut entries = Vec::new();
        for &(tag, kind) in CAPTURED_TAGS {
            let Some(field) = exif.get_field(tag, In::PRIMARY) else {
                continue;
            };
            let Some(text) = ascii_value(&field.value) else {
                continue;
            };
            let text = match kind {
                FieldKind::Text => Some(text),
                FieldKind::Timestamp => normalize_timestamp(&text),
            };
            if let Some(text) = text {
                entries.push((tag, text));
            }
        }

        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, tag: Tag) -> Option<&str> {
        self.entries
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, v)| v.as_str())
    }

    /// Serialize to a big-endian TIFF structure with the orientation forced
    /// to 1. GPS tags are never written.
    pub fn to_tiff(&self) -> Result<Vec<u8>, MetadataError> {
        let mut fields: Vec<Field> = self
            .entries
            .iter()
            .map(|(tag, text)| Field {
                tag: *tag,
                ifd_num: In::PRIMARY,
                value: Value::Ascii(vec![text.clone().into_bytes()]),
            })
            .collect();
        fields.push(Field {
            tag: Tag::Orientation,
            ifd_num: In::PRIMARY,
            value: Value::Short(vec![1]),
        });

        let mut writer = Writer::new();
        for field in &fields {
            writer.push_field(field);
        }
        let mut buf = Cursor::new(Vec::new());
        writer
            .write(&mut buf, false)
            .map_err(|e| MetadataError::Write(e.to_string()))?;
        Ok(buf.into_inner())
    }
}

/// First ASCII component with NUL padding and whitespace removed
fn ascii_value(value: &Value) -> Option<String> {
    match value {
        Value::Ascii(parts) => {
            let first = parts.first()?;
            let text = String::from_utf8_lossy(first);
            let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
            (!text.is_empty()).then(|| text.to_string())
        }
        _ => None,
    }
}

/// Render an EXIF timestamp as fixed-width `YYYY:MM:DD HH:MM:SS`.
///
/// Returns `None` for blank or impossible dates.
pub fn normalize_timestamp(raw: &str) -> Option<String> {
    let parsed = exif::DateTime::from_ascii(raw.as_bytes()).ok()?;
    let date = NaiveDate::from_ymd_opt(parsed.year.into(), parsed.month.into(), parsed.day.into())?;
    let datetime = date.and_hms_opt(parsed.hour.into(), parsed.minute.into(), parsed.second.into())?;
    Some(datetime.format("%Y:%m:%d %H:%M:%S").to_string())
}

fn try_transplant(source: &[u8], target: &[u8]) -> Result<Vec<u8>, MetadataError> {
    let captured = catch_unwind(AssertUnwindSafe(|| CapturedMetadata::read(source)))
        .map_err(|_| MetadataError::Panicked)??;
    if captured.is_empty() {
        return Err(MetadataError::NotFound);
    }
    let tiff = captured.to_tiff()?;
    insert_exif_segment(target, &tiff)
}

/// Copy capture metadata from `source` into the JPEG `target`.
///
/// Returns `target` unchanged when the source has no metadata or any step
/// fails.
pub fn transplant(source: &[u8], target: Vec<u8>) -> Vec<u8> {
    match try_transplant(source, &target) {
        Ok(out) => out,
        Err(MetadataError::NotFound) => {
            debug!("no capture metadata in source; output left as is");
            target
        }
        Err(e) => {
            warn!(error = %e, "metadata transplant skipped");
            target
        }
    }
}
