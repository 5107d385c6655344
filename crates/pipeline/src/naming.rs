//! Filename normalization and output name derivation.
//!
//! Some mobile file pickers report `.HEIC`/`.HEIF` in upper case; everything
//! downstream works on the canonical lowercase extension.

use crate::config::TargetFormat;

/// Source extensions recognized as HEIC/HEIF (compared case-insensitively).
pub const HEIC_EXTENSIONS: &[&str] = &[".heic", ".heif"];

/// MIME types accepted for HEIC/HEIF submissions.
pub const HEIC_MIME_TYPES: &[&str] = &["image/heic", "image/heif"];

/// Returns the byte offset where a trailing `.heic`/`.heif` extension starts.
fn heic_extension_start(name: &str) -> Option<usize> {
    HEIC_EXTENSIONS.iter().find_map(|ext| {
        let start = name.len().checked_sub(ext.len())?;
        let tail = name.get(start..)?;
        tail.eq_ignore_ascii_case(ext).then_some(start)
    })
}

/// Rewrites a trailing HEIC/HEIF extension to its lowercase form.
///
/// `IMG_0001.HEIC` becomes `IMG_0001.heic`; names without a HEIC/HEIF
/// extension are returned unchanged.
pub fn normalize_source_name(name: &str) -> String {
    match heic_extension_start(name) {
        Some(start) => format!("{}{}", &name[..start], name[start..].to_ascii_lowercase()),
        None => name.to_string(),
    }
}

/// Derives the output filename for a conversion.
///
/// Strips a trailing `.heic`/`.heif` (any case) and appends the extension of
/// `format`. A name without such an extension keeps its full text and gets the
/// new extension appended.
pub fn derive_output_name(name: &str, format: TargetFormat) -> String {
    let stem = match heic_extension_start(name) {
        Some(start) => &name[..start],
        None => name,
    };
    format!("{}{}", stem, format.extension())
}

/// Whether a submission looks like a HEIC/HEIF file by MIME type or name.
pub fn is_heic_candidate(name: &str, mime: Option<&str>) -> bool {
    let mime_matches = mime
        .map(|m| {
            let m = m.trim().to_ascii_lowercase();
            HEIC_MIME_TYPES.contains(&m.as_str())
        })
        .unwrap_or(false);
    mime_matches || heic_extension_start(name).is_some()
}
